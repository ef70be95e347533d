//! Course Repository Backend - binary entry point
//! Delegates to the library for all app logic.

#[tokio::main]
async fn main() {
    if let Err(e) = course_repository_backend::run().await {
        tracing::error!("Fatal: {}", e);
        eprintln!("Fatal: {}", e);
        std::process::exit(1);
    }
}
