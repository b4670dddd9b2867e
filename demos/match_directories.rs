//! Directory Matching Example
//!
//! Compares two aligned directories of "pre" and "post" evidence images
//! against the archived catalogs and prints the JSON report.
//!
//! Run with: cargo run --example match_directories -- <models_dir> <pre_dir> <post_dir> [catalog_dir] [ela_dir]

use std::{env, fs, path::Path, sync::Arc};

use siamese_forensics::{
    PipelineConfig,
    analysis::ela::TamperDetector,
    catalog::EmbeddingCatalog,
    embedding::SiameseModels,
    error::Result,
    pipeline::{MatchingOrchestrator, pairing::SortOrderPairing},
    report::JsonReport,
    source::load_directory,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 4 {
        println!("Usage: {} <models_dir> <pre_dir> <post_dir> [catalog_dir] [ela_dir]", args[0]);
        println!();
        println!("  models_dir  - Directory holding pre.json, post.json and match.json");
        println!("  pre_dir     - Directory of pre images");
        println!("  post_dir    - Directory of post images (paired by sort order)");
        println!("  catalog_dir - Where pre_values.csv and post_values.csv live (default: .)");
        println!("  ela_dir     - Optional directory for ELA images of flagged files");
        return Ok(());
    }

    let models_dir = Path::new(&args[1]);
    let catalog_dir = Path::new(args.get(4).map(|s| s.as_str()).unwrap_or("."));

    let config_path = models_dir.join("pipeline.json");
    let config = if config_path.exists() {
        PipelineConfig::from_json_file(&config_path)?
    } else {
        PipelineConfig::default()
    };

    println!("Loading models from {}...", models_dir.display());
    let models = SiameseModels::load(
        models_dir.join("pre.json"),
        models_dir.join("post.json"),
        models_dir.join("match.json"),
    )?;

    let pre_catalog = EmbeddingCatalog::open(
        "pre",
        catalog_dir.join("pre_values.csv"),
        models.pre.output_dim(),
    )?;
    let post_catalog = EmbeddingCatalog::open(
        "post",
        catalog_dir.join("post_values.csv"),
        models.post.output_dim(),
    )?;
    println!(
        "  Catalogs: {} pre entries, {} post entries",
        pre_catalog.len(),
        post_catalog.len()
    );

    let pre = load_directory(&args[2])?;
    let post = load_directory(&args[3])?;
    println!("  Loaded {} pre and {} post images", pre.len(), post.len());

    let ela_images = args.get(5).map(|dir| (dir.clone(), pre.clone(), post.clone()));

    let orchestrator = MatchingOrchestrator::new(
        Arc::new(models),
        Arc::new(pre_catalog),
        Arc::new(post_catalog),
    )
    .with_config(config.clone());

    let report = orchestrator.run_with(pre, post, &SortOrderPairing)?;
    println!("{}", JsonReport::new(&report, &config).to_json()?);

    if let Some((dir, pre, post)) = ela_images {
        fs::create_dir_all(&dir)?;
        let detector = TamperDetector::new(config.ela_quality)
            .with_resave_quality(config.ela_resave_quality)
            .with_scale(config.ela_scale)
            .with_amplification(config.amplification);

        let flagged = report
            .pre_flagged
            .iter()
            .chain(&report.post_flagged)
            .map(|score| score.label.as_str())
            .collect::<Vec<_>>();

        for image in pre.iter().chain(&post) {
            if !flagged.contains(&image.label.as_str()) {
                continue;
            }
            let name = Path::new(&image.label)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "image".into());
            let output = Path::new(&dir).join(format!("{name}-ELA.png"));
            detector.analyze(&image.image)?.save(&output)?;
            println!("  ELA image: {}", output.display());
        }
    }

    Ok(())
}
