use osmogr::app::{RiverCli, parse_args, run_rivermap};

fn main() -> anyhow::Result<()> {
    let cli: RiverCli = parse_args();
    run_rivermap(&cli)
}
