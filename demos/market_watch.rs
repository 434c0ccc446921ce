use market_sync::{MarketSync, SyncConfig};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("market_sync=info")),
        )
        .init();

    println!("Market Watch");
    println!("============");

    let sync = MarketSync::start(SyncConfig::from_env())?;
    let mut updates = sync.subscribe();

    // Watch for a minute
    let _ = timeout(Duration::from_secs(60), async {
        while updates.changed().await.is_ok() {
            let view = updates.borrow_and_update().clone();
            if view.is_loading {
                continue;
            }

            println!("\n{:-<50}", "");
            println!("Stream: {}", view.connection_status);
            if let Some(error) = &view.error {
                println!("! {error}");
            }
            for quote in view.quotes.iter().take(10) {
                println!(
                    "{:<6} ${:<14.4} {:>+7.2}%",
                    quote.symbol.to_uppercase(),
                    quote.current_price,
                    quote.price_change_percentage_24h
                );
            }
        }
    })
    .await;

    println!("\nBackgrounding for 5s...");
    sync.set_active(false);
    sleep(Duration::from_secs(5)).await;
    println!("Stream: {}", sync.view().connection_status);

    println!("Foregrounding and forcing a refresh...");
    sync.set_active(true);
    sync.refresh();
    sleep(Duration::from_secs(5)).await;

    let view = sync.view();
    println!(
        "{} quotes, stream {}, refreshing: {}",
        view.quotes.len(),
        view.connection_status,
        view.is_refreshing
    );

    sync.shutdown().await;
    Ok(())
}
