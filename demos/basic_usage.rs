//! Basic usage of the tree engine.
//!
//! Builds a small category tree in memory, moves a branch, prints the
//! outline, then repeats the flow against SQLite.
//!
//! Run with: `cargo run --example basic_usage`
//! Set `RUST_LOG=mptree=debug` to see placement decisions.

use mptree::{
    indented_label, InMemoryNodeStore, NodeStore, Position, SqlNodeStore, TreeConfig, TreeError,
    TreeManager,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

async fn demo<S: NodeStore>(tree: &TreeManager<S>) -> Result<(), TreeError> {
    let music = tree.add_root(json!({"name": "Music"})).await?;
    let books = tree.add_root(json!({"name": "Books"})).await?;
    let jazz = tree.add_child(&music, json!({"name": "Jazz"})).await?;
    tree.add_child(&jazz, json!({"name": "Bebop"})).await?;
    tree.add_child(&music, json!({"name": "Rock"})).await?;
    tree.add_child(&books, json!({"name": "Poetry"})).await?;

    println!("Before move:");
    print_outline(tree).await?;

    tree.move_node(&jazz, &books, Position::LastChild).await?;

    println!("\nAfter moving Jazz under Books:");
    print_outline(tree).await?;

    let report = tree.check().await?;
    println!("\n{} nodes, consistent: {}", report.nodes, report.is_consistent());
    Ok(())
}

async fn print_outline<S: NodeStore>(tree: &TreeManager<S>) -> Result<(), TreeError> {
    for root in tree.get_roots().await? {
        for node in tree.get_descendants(&root, true).await? {
            let name = node.payload["name"].as_str().unwrap_or("?");
            println!(
                "  {:<16} {}",
                node.path.as_deref().unwrap_or("-"),
                indented_label(&node, name)
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mptree=info".parse()?))
        .init();

    println!("=== In-memory store ===");
    demo(&TreeManager::new(InMemoryNodeStore::new())).await?;

    println!("\n=== SQLite store ===");
    let config = TreeConfig {
        sql_url: Some("sqlite::memory:".into()),
        sql_max_connections: 1,
        ..Default::default()
    };
    let store = SqlNodeStore::new(&config).await?;
    demo(&TreeManager::with_config(store, &config)?).await?;

    Ok(())
}
