use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};

pub mod api;
pub mod export;
pub mod favorites;
pub mod logging;
pub mod records;
pub mod settings;
mod test_util;

pub use api::ApiClient;
pub use export::{
    CompositionOptions, ExportError, ExportOutcome, Exporter, ExporterConfig, FontColor,
    HttpFetcher, Placement,
};
pub use records::{GalleryParams, GenerateRequest, ImageRecord, PackEvent};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gallery: bool,
    pub categories: bool,
    pub packs: bool,
    pub pack: Option<String>,
    pub image: Option<String>,
    pub search: Option<String>,
    pub generate: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub age_range: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort: Option<String>,
    pub pdf: bool,
    pub caption: Option<String>,
    pub subcaption: Option<String>,
    pub position: Option<String>,
    pub color: Option<String>,
    pub font_size: Option<f32>,
    pub out_dir: Option<String>,
    pub favorite: Option<String>,
    pub unfavorite: Option<String>,
    pub show_favorites: bool,
    pub clear_favorites: bool,
    pub settings_path: Option<String>,
    pub verbose: bool,
}

pub async fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;
    let client = ApiClient::new(&settings.api_base_url);

    if config.show_favorites {
        let favorites = favorites::Favorites::load();
        return Ok(format_images(favorites.entries()));
    }
    if config.clear_favorites {
        let mut favorites = favorites::Favorites::load();
        favorites.clear()?;
        return Ok("favorites cleared".to_string());
    }
    if let Some(id) = &config.unfavorite {
        let mut favorites = favorites::Favorites::load();
        if favorites.remove(id)? {
            return Ok(format!("removed {} from favorites", id));
        }
        return Ok(format!("{} was not in favorites", id));
    }
    if let Some(id) = &config.favorite {
        let record = client.image(id).await?;
        let mut favorites = favorites::Favorites::load();
        favorites.add(record)?;
        return Ok(format!("added {} to favorites", id));
    }

    if config.gallery {
        let params = gallery_params(&config);
        let response = client.gallery(&params).await?;
        let mut output = format_images(&response.images);
        output.push_str(&format!(
            "\npage {}/{} ({} total)",
            response.page, response.total_pages, response.total
        ));
        return Ok(output);
    }

    if let Some(keyword) = &config.search {
        let result = client.search(keyword, config.category.as_deref()).await?;
        if !result.found {
            return Ok(format!("no pages found for '{}'", keyword));
        }
        return Ok(format_images(&result.images));
    }

    if let Some(keyword) = &config.generate {
        let request = GenerateRequest {
            keyword: keyword.trim().to_string(),
            category: config.category.clone(),
            force_new: None,
            difficulty: config.difficulty.clone(),
            age_range: config.age_range.clone(),
        };
        let record = client.generate(&request).await?;
        return Ok(format_images(std::slice::from_ref(&record)));
    }

    if config.categories {
        let categories = client.categories().await?;
        return Ok(format_categories(&categories));
    }

    if config.packs {
        let packs = client.packs().await?;
        let lines: Vec<String> = packs
            .iter()
            .map(|pack| {
                format!(
                    "{}\t{} {}\t{} / age {}",
                    pack.id, pack.emoji, pack.title, pack.difficulty, pack.age_range
                )
            })
            .collect();
        return Ok(lines.join("\n"));
    }

    if let Some(id) = &config.pack {
        return export_pack(&client, &settings, &config, id).await;
    }

    if let Some(id) = &config.image {
        return export_image(&client, &settings, &config, id).await;
    }

    Err(anyhow!(
        "nothing to do (try --gallery, --packs, --pack <id>, --image <id>, --search or --generate)"
    ))
}

async fn export_pack(
    client: &ApiClient,
    settings: &settings::Settings,
    config: &Config,
    id: &str,
) -> Result<String> {
    let pack = client.pack(id).await?;
    let mut stream = client.stream_pack(id).await?;
    let mut images = Vec::new();
    while let Some(event) = stream.next_event().await? {
        match event {
            PackEvent::Status { message } => tracing::info!("{}", message),
            PackEvent::Progress {
                current,
                total,
                keyword,
            } => tracing::info!("generating {} ({}/{})", keyword, current, total),
            PackEvent::Image { image } => images.push(image),
            PackEvent::Complete { total } => tracing::info!("{} pages ready", total),
            PackEvent::Fatal { message } => {
                return Err(anyhow!("pack generation failed: {}", message));
            }
        }
    }
    if images.is_empty() {
        return Err(anyhow!("pack '{}' produced no images", pack.title));
    }

    let exporter = build_exporter(settings, config)?;
    let options = composition_options(config, settings)?;
    let outcome = exporter.export_batch(&images, options.as_ref()).await?;
    Ok(describe_outcome(outcome))
}

async fn export_image(
    client: &ApiClient,
    settings: &settings::Settings,
    config: &Config,
    id: &str,
) -> Result<String> {
    let record = client.image(id).await?;
    let exporter = build_exporter(settings, config)?;
    let options = composition_options(config, settings)?;

    let outcome = if config.pdf {
        exporter
            .export_batch(std::slice::from_ref(&record), options.as_ref())
            .await?
    } else {
        let options = options.unwrap_or_else(|| default_options(settings));
        exporter.export_png(&record, &options).await?
    };
    Ok(describe_outcome(outcome))
}

fn gallery_params(config: &Config) -> GalleryParams {
    GalleryParams {
        page: config.page,
        limit: config.limit,
        category: config.category.clone(),
        sort: config.sort.as_deref().and_then(|sort| match sort {
            "popular" => Some(records::SortOrder::Popular),
            _ => Some(records::SortOrder::Newest),
        }),
        search: None,
        difficulty: config.difficulty.clone(),
        age_range: config.age_range.clone(),
    }
}

fn build_exporter(
    settings: &settings::Settings,
    config: &Config,
) -> Result<Exporter<HttpFetcher>> {
    let font = match &settings.caption_font_path {
        Some(path) => Some(
            export::CaptionFont::load(Path::new(path))
                .with_context(|| "failed to load caption font")?,
        ),
        None => None,
    };
    let output_dir = config
        .out_dir
        .clone()
        .or_else(|| settings.output_dir.clone())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(Exporter::new(
        HttpFetcher::new(settings.image_proxy.clone()),
        ExporterConfig {
            file_prefix: settings.file_prefix.clone(),
            watermark: settings.watermark.clone(),
            output_dir,
            font,
        },
    ))
}

fn default_options(settings: &settings::Settings) -> CompositionOptions {
    let color = settings
        .caption_color
        .parse()
        .unwrap_or(FontColor::Black);
    CompositionOptions::new("", Placement::OverlayBottom, color, settings.caption_font_size)
}

/// Builds composition options when a caption was requested; `None` leaves
/// batch pages uncaptioned.
fn composition_options(
    config: &Config,
    settings: &settings::Settings,
) -> Result<Option<CompositionOptions>> {
    let Some(caption) = &config.caption else {
        return Ok(None);
    };
    let placement = match &config.position {
        Some(position) => position.parse()?,
        None => Placement::StripBelow,
    };
    let color = match &config.color {
        Some(color) => color.parse()?,
        None => settings.caption_color.parse().unwrap_or(FontColor::Black),
    };
    let font_size = config.font_size.unwrap_or(settings.caption_font_size);
    let mut options = CompositionOptions::new(caption, placement, color, font_size);
    if let Some(subcaption) = &config.subcaption {
        options.set_subcaption(subcaption);
    }
    Ok(Some(options))
}

fn describe_outcome(outcome: ExportOutcome) -> String {
    match outcome {
        ExportOutcome::Saved {
            path,
            pages,
            warnings,
        } => {
            let mut output = format!("saved {} ({} pages)", path.display(), pages);
            for warning in warnings {
                output.push_str(&format!("\nwarning: {}", warning));
            }
            output
        }
        ExportOutcome::Cancelled => "export cancelled".to_string(),
        ExportOutcome::Busy => "an export is already running".to_string(),
    }
}

fn format_categories(categories: &[records::Category]) -> String {
    if categories.is_empty() {
        return "no categories".to_string();
    }
    categories
        .iter()
        .map(|category| {
            format!(
                "{}\t{} {}\t{} keywords",
                category.id,
                category.emoji,
                category.label,
                category.keywords.len()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_images(images: &[records::ImageRecord]) -> String {
    if images.is_empty() {
        return "no images".to_string();
    }
    images
        .iter()
        .map(|image| {
            let difficulty = image
                .difficulty
                .map(|difficulty| difficulty.label())
                .unwrap_or("-");
            format!("{}\t{}\t{}\t{}", image.id, image.keyword, difficulty, image.image_url)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
