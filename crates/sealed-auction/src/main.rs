#[tokio::main]
async fn main() {
    sealed_auction::start(std::env::args()).await;
}
