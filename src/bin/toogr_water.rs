use osmogr::app::{WaterCli, parse_args, run_water};

fn main() -> anyhow::Result<()> {
    let cli: WaterCli = parse_args();
    run_water(&cli)
}
