use progress_engine::{
    CatalogError, EngineConfig, OpenError, ProgressEngine, SystemClock, ZoneCatalog,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub(crate) const EPISODE_ZONE: &str = "ganesha";
pub(crate) const EPISODE_SCENE: &str = "modak";
pub(crate) const PLAYER_NAME: &str = "Asha";
pub(crate) const PLAYER_AVATAR: &str = "elephant";

const ZONES_SOURCE_NAME: &str = "embedded:zones.xml";
const ZONES_XML: &str = r#"<Zones>
  <Zone id="ganesha" requiredStars="0">
    <Scene id="modak" order="1"/>
    <Scene id="pond" order="2"/>
    <Scene id="festival" order="3"/>
  </Zone>
  <Zone id="hanuman" requiredStars="6">
    <Scene id="leap" order="1"/>
    <Scene id="mountain" order="2"/>
  </Zone>
</Zones>"#;

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error("zone catalog rejected: {0}")]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Open(#[from] OpenError),
}

pub(crate) struct AppWiring {
    pub(crate) engine: ProgressEngine,
}

pub(crate) fn build_app() -> Result<AppWiring, BootstrapError> {
    init_tracing();
    info!("=== Episode Demo Startup ===");

    let catalog = demo_catalog()?;
    let config = EngineConfig::from_env();
    let engine = ProgressEngine::open_file_backed(catalog, config, SystemClock::shared())?;
    Ok(AppWiring { engine })
}

pub(crate) fn demo_catalog() -> Result<ZoneCatalog, CatalogError> {
    ZoneCatalog::from_xml_str(ZONES_SOURCE_NAME, ZONES_XML)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
