use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "kidscolor",
    version,
    about = "Browse and export KidsColor coloring pages as PNG or PDF"
)]
struct Cli {
    /// List the gallery
    #[arg(long = "gallery")]
    gallery: bool,

    /// List categories and their keyword counts
    #[arg(long = "categories")]
    categories: bool,

    /// List available packs
    #[arg(long = "packs")]
    packs: bool,

    /// Generate a pack and export every page into one PDF
    #[arg(short = 'p', long = "pack")]
    pack: Option<String>,

    /// Export a single page by image id
    #[arg(short = 'i', long = "image")]
    image: Option<String>,

    /// Search the gallery by keyword
    #[arg(long = "search")]
    search: Option<String>,

    /// Request generation of a new page for a keyword
    #[arg(short = 'g', long = "generate")]
    generate: Option<String>,

    /// Category filter (gallery/search/generate)
    #[arg(long = "category")]
    category: Option<String>,

    /// Difficulty filter: simple, medium, detailed
    #[arg(long = "difficulty")]
    difficulty: Option<String>,

    /// Age range filter: 2-4, 5-8, 9-12
    #[arg(long = "age-range")]
    age_range: Option<String>,

    /// Gallery page number
    #[arg(long = "page")]
    page: Option<u32>,

    /// Gallery page size
    #[arg(short = 'n', long = "limit")]
    limit: Option<u32>,

    /// Gallery sort order: newest or popular
    #[arg(long = "sort")]
    sort: Option<String>,

    /// Export a single image as PDF instead of PNG
    #[arg(long = "pdf")]
    pdf: bool,

    /// Caption text drawn onto exported pages (max 40 characters)
    #[arg(short = 'c', long = "caption")]
    caption: Option<String>,

    /// Secondary caption line (max 60 characters)
    #[arg(long = "subcaption")]
    subcaption: Option<String>,

    /// Caption position: above, below, top, bottom
    #[arg(long = "position")]
    position: Option<String>,

    /// Caption color: black, orange, teal, purple, red, blue
    #[arg(long = "color")]
    color: Option<String>,

    /// Caption font size
    #[arg(long = "font-size")]
    font_size: Option<f32>,

    /// Directory to write exported files into
    #[arg(short = 'o', long = "out")]
    out_dir: Option<String>,

    /// Add an image id to local favorites
    #[arg(long = "favorite")]
    favorite: Option<String>,

    /// Remove an image id from local favorites
    #[arg(long = "unfavorite")]
    unfavorite: Option<String>,

    /// Show local favorites and exit
    #[arg(long = "show-favorites")]
    show_favorites: bool,

    /// Clear local favorites and exit
    #[arg(long = "clear-favorites")]
    clear_favorites: bool,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    kidscolor::logging::init(cli.verbose)?;

    let output = kidscolor::run(kidscolor::Config {
        gallery: cli.gallery,
        categories: cli.categories,
        packs: cli.packs,
        pack: cli.pack,
        image: cli.image,
        search: cli.search,
        generate: cli.generate,
        category: cli.category,
        difficulty: cli.difficulty,
        age_range: cli.age_range,
        page: cli.page,
        limit: cli.limit,
        sort: cli.sort,
        pdf: cli.pdf,
        caption: cli.caption,
        subcaption: cli.subcaption,
        position: cli.position,
        color: cli.color,
        font_size: cli.font_size,
        out_dir: cli.out_dir,
        favorite: cli.favorite,
        unfavorite: cli.unfavorite,
        show_favorites: cli.show_favorites,
        clear_favorites: cli.clear_favorites,
        settings_path: cli.read_settings,
        verbose: cli.verbose,
    })
    .await?;

    println!("{}", output);
    Ok(())
}
