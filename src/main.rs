#[tokio::main]
async fn main() {
    if let Err(e) = rehatrack::run().await {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}
