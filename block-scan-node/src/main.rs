use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    block_scan_node::run().await
}
