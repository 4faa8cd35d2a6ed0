//! Fires concurrent stock adjustments at one product and prints the product
//! before and after, to check that no update is lost.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures_util::future::join_all;
use stockpile_core::Product;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stockpile-client")]
#[command(about = "Concurrent stock adjustment smoke test")]
struct Cli {
    /// Base URL of the API server
    #[arg(long, default_value = "http://localhost:8080")]
    base_url: String,
    /// Product to adjust
    #[arg(long, default_value = "00000000-0000-0000-0000-XYX")]
    product_id: String,
    /// Number of concurrent clients
    #[arg(long, default_value_t = 30)]
    clients: u32,
    /// Stock change sent by each client
    #[arg(long, default_value_t = 10, allow_hyphen_values = true)]
    stock_change: i64,
    /// Delay between client launches, in milliseconds
    #[arg(long, default_value_t = 100)]
    stagger_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockpile_client=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    println!("=== Current product ===");
    let before = match get_product(&client, &cli.base_url, &cli.product_id).await {
        Ok(product) => Some(product),
        Err(err) => {
            warn!("Failed to get product: {:#}", err);
            None
        }
    };
    print_product(before.as_ref());

    println!("\n=== Concurrent stock updates ({} clients) ===", cli.clients);
    let mut handles = Vec::with_capacity(cli.clients as usize);
    for i in 1..=cli.clients {
        let client = client.clone();
        let base_url = cli.base_url.clone();
        let product_id = cli.product_id.clone();
        let stock_change = cli.stock_change;
        handles.push(tokio::spawn(async move {
            match process_product(&client, &base_url, &product_id, stock_change).await {
                Ok(product) => {
                    info!(client = i, stock = product.stock, version = product.version, "processed");
                    true
                }
                Err(err) => {
                    warn!(client = i, "Failed to process product: {:#}", err);
                    false
                }
            }
        }));
        tokio::time::sleep(Duration::from_millis(cli.stagger_ms)).await;
    }

    let succeeded = join_all(handles)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(true)))
        .count() as i64;

    println!("\n=== Product after updates ===");
    let after = get_product(&client, &cli.base_url, &cli.product_id).await?;
    print_product(Some(&after));

    let expected = before.as_ref().map(|p| p.stock).unwrap_or(0) + succeeded * cli.stock_change;
    println!(
        "\n{} of {} requests succeeded; expected stock {}, got {}",
        succeeded, cli.clients, expected, after.stock
    );
    if after.stock != expected {
        bail!("stock mismatch: expected {}, got {}", expected, after.stock);
    }
    Ok(())
}

async fn get_product(client: &reqwest::Client, base_url: &str, id: &str) -> Result<Product> {
    let response = client
        .get(format!("{}/products/{}", base_url, id))
        .send()
        .await
        .context("request failed")?;
    decode(response).await
}

async fn process_product(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    stock_change: i64,
) -> Result<Product> {
    let response = client
        .post(format!("{}/products/{}/process", base_url, id))
        .query(&[("stock_change", stock_change)])
        .send()
        .await
        .context("request failed")?;
    decode(response).await
}

async fn decode(response: reqwest::Response) -> Result<Product> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("status {}: {}", status, body);
    }
    response.json::<Product>().await.context("invalid product body")
}

fn print_product(product: Option<&Product>) {
    match product {
        None => println!("Product: <none>"),
        Some(p) => println!(
            "{}",
            serde_json::to_string_pretty(p).unwrap_or_else(|_| format!("{:?}", p))
        ),
    }
}
