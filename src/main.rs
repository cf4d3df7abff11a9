use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;

use image_embeddings::config::{ Opts, SearchCommand, SubCommand };
use image_embeddings::{ ClipExtractor, ImageSearchSystem, SurrealStore, VectorStore };

fn print_results(cmd: &SearchCommand, results: &[image_embeddings::SearchHit]) -> Result<()> {
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results found!");
        return Ok(());
    }

    println!("\nResults for: {}", cmd.query);
    println!("---------------");
    for (i, result) in results.iter().enumerate() {
        println!("{}. {}", i + 1, result.image_id);
        println!("   Path: {}", result.path().unwrap_or("<unknown>"));
        println!("   Distance: {:.4}", result.distance);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    let store = SurrealStore::open_with_distance(&opts.db, &opts.collection, opts.distance).await?;

    match &opts.subcmd {
        SubCommand::Count => {
            println!("{}", store.count().await?);
        }
        SubCommand::Show(cmd) => {
            match store.get(&cmd.id).await? {
                Some(record) => {
                    println!("{}", serde_json::to_string_pretty(&record.metadata)?);
                    println!("embedding size: {}", record.embedding.len());
                }
                None => println!("{} is not indexed", cmd.id),
            }
        }
        SubCommand::Index(cmd) => {
            let extractor = Arc::new(ClipExtractor::new(&opts.extractor_config())?);
            let system = ImageSearchSystem::new(extractor, store);

            info!("Indexing images from {}", cmd.dir.display());
            let report = system.index_directory_with_progress(&cmd.dir, |progress| {
                info!("[{}/{}] {} {:?}", progress.processed, progress.total, progress.image_id, progress.outcome);
            }).await?;

            println!(
                "Images processed! Total: {}, New embeddings: {}, Skipped: {}, Failed: {}",
                report.total,
                report.newly_indexed,
                report.skipped,
                report.failed.len()
            );
            for failed in &report.failed {
                eprintln!("  {}: {}", failed.image_id, failed.reason);
            }
        }
        SubCommand::Search(cmd) => {
            let extractor = Arc::new(ClipExtractor::new(&opts.extractor_config())?);
            let system = ImageSearchSystem::new(extractor, store);

            let results = system.search(&cmd.query, cmd.k).await?;
            print_results(cmd, &results)?;
        }
    }

    Ok(())
}
