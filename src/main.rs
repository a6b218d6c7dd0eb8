#[tokio::main]
async fn main() {
    if let Err(e) = commonground::cli::parse_cli_commands().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
