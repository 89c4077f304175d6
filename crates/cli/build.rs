use {
    anyhow::Result,
    vergen::{BuildBuilder, Emitter},
};

fn main() -> Result<()> {
    // https://crates.io/crates/vergen

    let build = BuildBuilder::default().build_date(true).build()?;

    Emitter::default().add_instructions(&build)?.emit()?;

    Ok(())
}
