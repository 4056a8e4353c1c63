//! The `tsload` binary. See the [`stresstest`] library for details.

fn main() -> anyhow::Result<()> {
    stresstest::cli::execute()
}
