//! Configuration types and re-exports

pub use super::{
    AppConfig, AtrParams, AwesomeParams, Band, BollingerParams, BotConfig, CciParams, CmfParams,
    ConfidencePenalties, DomParams, EmaTrendParams, IndicatorsConfig, KdjParams, MacdParams,
    ObvParams, PaperConfig, RiskConfig, RsiParams, ScreenerConfig, SignalConfig, StochRsiParams,
    StochasticParams, WilliamsParams,
};
