use anyhow::Result;

fn main() -> Result<()> {
    quadlog_cli::run()
}
