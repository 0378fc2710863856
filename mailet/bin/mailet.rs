#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = mailet::find_config_file()?;
    let mailet = mailet::Mailet::load(&config_path)?;

    mailet.run().await
}
