use std::path::PathBuf;

use clap::{ Parser, Subcommand };

use crate::extractor::ExtractorConfig;
use crate::store::{ Distance, DEFAULT_COLLECTION };

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Index a folder of images and search it with text")]
pub struct Opts {
    /// Vector store directory
    #[arg(long, value_name = "PATH", default_value_os_t = default_db_path())]
    pub db: PathBuf,
    /// Collection inside the store
    #[arg(long, value_name = "NAME", default_value = DEFAULT_COLLECTION)]
    pub collection: String,
    /// Distance used to rank results: l2, cosine or ip
    #[arg(long, value_name = "METRIC", default_value_t = Distance::L2)]
    pub distance: Distance,
    /// Where CLIP weights are cached
    #[arg(long, value_name = "PATH")]
    pub model_cache: Option<PathBuf>,
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// Embed images in a directory that are not indexed yet
    Index(IndexCommand),
    /// Find the images closest to a text description
    Search(SearchCommand),
    /// Number of indexed images
    Count,
    /// Print the stored record of one image
    Show(ShowCommand),
}

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    /// Directory holding .png/.jpg/.jpeg files
    pub dir: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// Free-text description
    pub query: String,
    /// Number of results
    #[arg(short, value_name = "K", default_value_t = 4)]
    pub k: usize,
    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// Image identifier (its file name)
    pub id: String,
}

impl Opts {
    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            cache_dir: self.model_cache.clone(),
            show_download_progress: true,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("image-embeddings").join("db"))
        .unwrap_or_else(|| PathBuf::from("./image_db"))
}
