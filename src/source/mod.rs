//! Streams of OSM objects.
//!
//! Every call to [`Source::read`] is one full pass from the start of the
//! input. [`open`] gives a re-readable source and spools standard input to
//! a temporary file so that two-pass tools can read it twice.
//! [`open_once`] streams standard input directly for single-pass tools.

mod pbf;
mod xml;

use anyhow::{Context, Result, anyhow};
use osmpbf::BlobReader;
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::Error;
use crate::osm::{OsmObject, ReadKinds};

pub use pbf::read_pbf;
pub use xml::read_xml;

pub trait Source {
    /// Deliver every object of the requested kinds, in file order.
    fn read(
        &self,
        kinds: ReadKinds,
        handler: &mut dyn FnMut(OsmObject) -> Result<()>,
    ) -> Result<()>;

    /// Human readable description used in log output.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Pbf,
    Xml,
}

impl InputFormat {
    /// Guess the format from a file name. `None` when the extension says
    /// nothing useful.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pbf" => Some(InputFormat::Pbf),
            "osm" | "xml" => Some(InputFormat::Xml),
            _ => None,
        }
    }

    /// OSM XML starts with `<` after optional whitespace; anything else is
    /// taken to be PBF.
    pub fn sniff(head: &[u8]) -> Self {
        match head.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'<') => InputFormat::Xml,
            _ => InputFormat::Pbf,
        }
    }
}

/// OSM data in a file on disk, possibly a spooled copy of stdin.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    format: InputFormat,
    label: String,
    // Keeps the spooled stdin copy alive for as long as the source.
    _spool: Option<NamedTempFile>,
}

impl FileSource {
    pub fn format(&self) -> InputFormat {
        self.format
    }
}

impl Source for FileSource {
    fn read(
        &self,
        kinds: ReadKinds,
        handler: &mut dyn FnMut(OsmObject) -> Result<()>,
    ) -> Result<()> {
        match self.format {
            InputFormat::Pbf => {
                let reader = BlobReader::from_path(&self.path).with_context(|| {
                    format!("Source: Failed to open PBF file {:?}", self.path)
                })?;
                read_pbf(reader, kinds, handler)
                    .with_context(|| format!("Source: Failed to read {}", self.label))
            }
            InputFormat::Xml => {
                let file = File::open(&self.path).map_err(|source| Error::FileNotFound {
                    path: self.path.clone(),
                    source,
                })?;
                read_xml(BufReader::new(file), kinds, handler)
                    .with_context(|| format!("Source: Failed to read {}", self.label))
            }
        }
    }

    fn describe(&self) -> String {
        let format = match self.format {
            InputFormat::Pbf => "pbf",
            InputFormat::Xml => "xml",
        };
        format!("{} ({})", self.label, format)
    }
}

/// Open `path` for reading; `-` means standard input.
pub fn open(path: &Path) -> Result<FileSource> {
    if path == Path::new("-") {
        return open_stdin();
    }

    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    if let Some(ext @ ("gz" | "bz2")) = ext.as_deref() {
        return Err(Error::FileFormat(format!(
            "Compressed input ({}) is not supported, decompress {} first",
            ext,
            path.display()
        ))
        .into());
    }

    let mut file = File::open(path).map_err(|source| Error::FileNotFound {
        path: path.to_path_buf(),
        source,
    })?;

    let format = match InputFormat::from_path(path) {
        Some(format) => format,
        None => {
            let mut head = [0u8; 64];
            let len = file.read(&mut head)?;
            InputFormat::sniff(&head[..len])
        }
    };

    Ok(FileSource {
        path: path.to_path_buf(),
        format,
        label: path.display().to_string(),
        _spool: None,
    })
}

fn open_stdin() -> Result<FileSource> {
    let mut spool = NamedTempFile::new().context("Source: Failed to create stdin spool file")?;
    let bytes = std::io::copy(&mut std::io::stdin().lock(), spool.as_file_mut())
        .context("Source: Failed to spool stdin")?;
    tracing::info!("Spooled {} bytes from stdin to {:?}", bytes, spool.path());

    let mut head = [0u8; 64];
    let len = File::open(spool.path())?.read(&mut head)?;

    Ok(FileSource {
        path: spool.path().to_path_buf(),
        format: InputFormat::sniff(&head[..len]),
        label: "stdin".to_string(),
        _spool: Some(spool),
    })
}

/// Open `path` for exactly one pass. Standard input is streamed instead of
/// spooled; files behave as with [`open`].
pub fn open_once(path: &Path) -> Result<Box<dyn Source>> {
    if path == Path::new("-") {
        return Ok(Box::new(StreamSource::new(std::io::stdin(), "stdin")));
    }
    Ok(Box::new(open(path)?))
}

/// A non-seekable stream that can be read a single time. The format is
/// sniffed from the first buffered bytes.
pub struct StreamSource<R> {
    reader: RefCell<Option<BufReader<R>>>,
    label: String,
}

impl<R: Read + Send> StreamSource<R> {
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader: RefCell::new(Some(BufReader::new(reader))),
            label: label.into(),
        }
    }
}

impl<R: Read + Send> Source for StreamSource<R> {
    fn read(
        &self,
        kinds: ReadKinds,
        handler: &mut dyn FnMut(OsmObject) -> Result<()>,
    ) -> Result<()> {
        let mut reader = self
            .reader
            .borrow_mut()
            .take()
            .ok_or_else(|| anyhow!("Source: {} can only be read once", self.label))?;
        let head = reader
            .fill_buf()
            .with_context(|| format!("Source: Failed to read {}", self.label))?;
        let format = InputFormat::sniff(head);
        tracing::debug!("Streaming {} as {:?}", self.label, format);

        let pass = match format {
            InputFormat::Pbf => read_pbf(BlobReader::new(reader), kinds, handler),
            InputFormat::Xml => read_xml(reader, kinds, handler),
        };
        pass.with_context(|| format!("Source: Failed to read {}", self.label))
    }

    fn describe(&self) -> String {
        format!("{} (stream)", self.label)
    }
}

/// Objects held in memory, replayed on every pass.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    objects: Vec<OsmObject>,
}

impl MemorySource {
    pub fn new(objects: Vec<OsmObject>) -> Self {
        Self { objects }
    }
}

impl Source for MemorySource {
    fn read(
        &self,
        kinds: ReadKinds,
        handler: &mut dyn FnMut(OsmObject) -> Result<()>,
    ) -> Result<()> {
        for object in &self.objects {
            if kinds.wants(object.kind()) {
                handler(object.clone())?;
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory ({} objects)", self.objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{ObjectKind, Tags, Way};
    use std::io::Write;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="47.0" lon="8.0"/>
  <node id="2" lat="47.1" lon="8.1"/>
  <way id="10"><nd ref="1"/><nd ref="2"/><tag k="waterway" v="river"/></way>
  <relation id="20"><member type="way" ref="10" role="outer"/><tag k="type" v="multipolygon"/></relation>
</osm>
"#;

    fn kinds_of(source: &dyn Source, kinds: ReadKinds) -> Vec<ObjectKind> {
        let mut seen = Vec::new();
        source
            .read(kinds, &mut |object| {
                seen.push(object.kind());
                Ok(())
            })
            .unwrap();
        seen
    }

    #[test]
    fn format_from_extension_and_content() {
        assert_eq!(
            InputFormat::from_path(Path::new("a.osm.pbf")),
            Some(InputFormat::Pbf)
        );
        assert_eq!(
            InputFormat::from_path(Path::new("a.OSM")),
            Some(InputFormat::Xml)
        );
        assert_eq!(InputFormat::from_path(Path::new("data")), None);
        assert_eq!(InputFormat::sniff(b"  \n<?xml"), InputFormat::Xml);
        assert_eq!(InputFormat::sniff(&[0, 0, 0, 13]), InputFormat::Pbf);
    }

    #[test]
    fn file_source_can_be_read_twice() {
        let mut file = tempfile::Builder::new().suffix(".osm").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let source = open(file.path()).unwrap();
        assert_eq!(source.format(), InputFormat::Xml);

        let first = kinds_of(&source, ReadKinds::RelationsOnly);
        assert_eq!(first, vec![ObjectKind::Relation]);
        let second = kinds_of(&source, ReadKinds::All);
        assert_eq!(second.len(), 4);
    }

    #[test]
    fn unknown_extension_is_sniffed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let source = open(file.path()).unwrap();
        assert_eq!(source.format(), InputFormat::Xml);
    }

    #[test]
    fn missing_input_is_reported() {
        let err = open(Path::new("/nonexistent/input.osm.pbf")).unwrap_err();
        assert!(err.to_string().contains("Could not open file"));
    }

    #[test]
    fn compressed_input_is_rejected() {
        let err = open(Path::new("planet.osm.bz2")).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn stream_source_reads_once() {
        let source = StreamSource::new(std::io::Cursor::new(SAMPLE.as_bytes()), "pipe");
        assert_eq!(kinds_of(&source, ReadKinds::All).len(), 4);

        let err = source.read(ReadKinds::All, &mut |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("can only be read once"));
    }

    #[test]
    fn stream_source_filters_kinds() {
        let source = StreamSource::new(std::io::Cursor::new(SAMPLE.as_bytes()), "pipe");
        assert_eq!(
            kinds_of(&source, ReadKinds::RelationsOnly),
            vec![ObjectKind::Relation]
        );
    }

    #[test]
    fn memory_source_filters_kinds() {
        let source = MemorySource::new(vec![OsmObject::Way(Way::new(1, [1, 2], Tags::new()))]);
        assert!(kinds_of(&source, ReadKinds::RelationsOnly).is_empty());
        assert_eq!(kinds_of(&source, ReadKinds::All), vec![ObjectKind::Way]);
    }
}
