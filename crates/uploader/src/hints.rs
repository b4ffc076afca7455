/// Coarse connection classification, as reported by the platform's network
/// information facility when one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EffectiveType {
    Slow2g,
    TwoG,
    ThreeG,
    FourG,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkHints {
    pub downlink_mbps: Option<f64>,
    pub effective_type: EffectiveType,
}

/// Injected network-hint capability. Platforms without the facility use
/// [`NoNetworkHints`], which reports everything unknown; the sizing logic
/// then falls back to its configured defaults.
pub trait NetworkHintsProvider: Send + Sync {
    fn hints(&self) -> NetworkHints;
}

pub struct NoNetworkHints;

impl NetworkHintsProvider for NoNetworkHints {
    fn hints(&self) -> NetworkHints {
        NetworkHints::default()
    }
}
