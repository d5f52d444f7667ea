use anyhow::Context;

fn main() -> anyhow::Result<()> {
    driftguard::run().context("driftguard command failed")?;
    Ok(())
}
