use osmogr::app::{ToogrCli, parse_args, run_toogr};

fn main() -> anyhow::Result<()> {
    let cli: ToogrCli = parse_args();
    run_toogr(&cli)
}
