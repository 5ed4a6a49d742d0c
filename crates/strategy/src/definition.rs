use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use common::{Error, Result};

use crate::engines::{MacdEngine, RsiEngine, SignalEngine, SmaCrossEngine};

/// A user-supplied strategy definition (TOML).
///
/// Example:
/// ```toml
/// engine = "rsi"
/// name = "BTC mean reversion"
///
/// [params]
/// period = 14
/// overbought = 70.0
/// oversold = 30.0
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyDefinition {
    /// Explicit engine tag. When absent, [`classify`] infers the engine
    /// from the parameter shape.
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl StrategyDefinition {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Definition(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Definition(format!("bad strategy definition: {e}")))
    }

    fn param_usize(&self, key: &str, default: usize) -> usize {
        self.params
            .get(key)
            .and_then(|v| v.as_integer())
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.params
            .get(key)
            .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
            .unwrap_or(default)
    }
}

/// Tagged result of definition classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    SmaCross,
    Rsi,
    Macd,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::SmaCross => write!(f, "sma-cross"),
            EngineKind::Rsi => write!(f, "rsi"),
            EngineKind::Macd => write!(f, "macd"),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sma-cross" | "sma_cross" | "sma" => Ok(EngineKind::SmaCross),
            "rsi" => Ok(EngineKind::Rsi),
            "macd" => Ok(EngineKind::Macd),
            other => Err(format!("unknown engine '{other}'")),
        }
    }
}

/// Decide which engine a definition targets.
///
/// An explicit `engine` key wins; otherwise the parameter shape is matched
/// against the known engines. The result is a tag — construction happens in
/// the registry, never through introspection of a live object.
pub fn classify(def: &StrategyDefinition) -> Result<EngineKind> {
    if let Some(tag) = &def.engine {
        return tag.parse().map_err(Error::Definition);
    }
    let has = |key: &str| def.params.contains_key(key);
    if has("period") && (has("overbought") || has("oversold")) {
        Ok(EngineKind::Rsi)
    } else if has("fast") && has("slow") {
        Ok(EngineKind::Macd)
    } else if has("short") && has("long") {
        Ok(EngineKind::SmaCross)
    } else {
        Err(Error::Definition(
            "cannot classify definition: no engine tag and unrecognized parameter shape".into(),
        ))
    }
}

type EngineFactory = fn(&StrategyDefinition) -> Result<Box<dyn SignalEngine>>;

/// engine-kind → factory, populated once at startup.
pub struct EngineRegistry {
    factories: HashMap<EngineKind, EngineFactory>,
}

impl EngineRegistry {
    /// Registry with the three built-in engines.
    pub fn builtin() -> Self {
        let mut factories: HashMap<EngineKind, EngineFactory> = HashMap::new();
        factories.insert(EngineKind::SmaCross, |def| {
            let engine =
                SmaCrossEngine::new(def.param_usize("short", 10), def.param_usize("long", 30))?;
            Ok(Box::new(engine))
        });
        factories.insert(EngineKind::Rsi, |def| {
            let engine = RsiEngine::new(
                def.param_usize("period", 14),
                def.param_f64("overbought", 70.0),
                def.param_f64("oversold", 30.0),
            )?;
            Ok(Box::new(engine))
        });
        factories.insert(EngineKind::Macd, |def| {
            let engine = MacdEngine::new(
                def.param_usize("fast", 12),
                def.param_usize("slow", 26),
                def.param_usize("signal", 9),
            )?;
            Ok(Box::new(engine))
        });
        Self { factories }
    }

    /// Classify and construct in one step.
    pub fn build(&self, def: &StrategyDefinition) -> Result<(EngineKind, Box<dyn SignalEngine>)> {
        let kind = classify(def)?;
        let factory = self.factories.get(&kind).ok_or_else(|| {
            Error::Definition(format!("no factory registered for engine '{kind}'"))
        })?;
        let engine = factory(def)?;
        info!(engine = %kind, name = def.name.as_deref().unwrap_or("-"), "Strategy engine built");
        Ok((kind, engine))
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
