use anyhow::Result;
use log::warn;

use ongrid_settings::options::Options;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    tokio::select! {
        result = ongrid_settings::app(options) => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            warn!("interrupted, in-flight workflow abandoned");
            Ok(())
        }
    }
}
