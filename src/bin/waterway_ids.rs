use osmogr::app::{WaterwayIdsCli, parse_args, run_waterway_ids};

fn main() -> anyhow::Result<()> {
    let cli: WaterwayIdsCli = parse_args();
    run_waterway_ids(&cli)?;
    Ok(())
}
