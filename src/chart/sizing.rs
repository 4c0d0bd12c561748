//! Responsive Sizing Controller
//!
//! An explicit numeric `layout.height` pins the chart. Without one the chart
//! follows the viewport: width is left to the container and height is a
//! bounded fraction of the viewport width, recomputed on every render.

use serde::{Deserialize, Serialize};

use super::document::Layout;
use super::render_state::{ChartEvent, EventHandler, RenderCommand, RenderState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Height stored with the artifact and used before the first measurement
    pub default_height: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub min_viewport: u32,
    pub max_viewport: u32,
    /// Height as a fraction of the clamped viewport width
    pub height_ratio: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            default_height: 420,
            min_height: 280,
            max_height: 560,
            min_viewport: 280,
            max_viewport: 1400,
            height_ratio: 0.6,
        }
    }
}

impl SizingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_height == 0 || self.min_height > self.max_height {
            return Err(format!(
                "sizing.min_height ({}) must be positive and not exceed max_height ({})",
                self.min_height, self.max_height
            ));
        }
        if self.min_viewport > self.max_viewport {
            return Err(format!(
                "sizing.min_viewport ({}) must not exceed max_viewport ({})",
                self.min_viewport, self.max_viewport
            ));
        }
        if !self.height_ratio.is_finite() || self.height_ratio <= 0.0 {
            return Err(format!(
                "sizing.height_ratio must be a positive number, got {}",
                self.height_ratio
            ));
        }
        if self.default_height == 0 {
            return Err("sizing.default_height must be positive".to_string());
        }
        Ok(())
    }

    /// `clamp(min_h, max_h, round(ratio * clamp(min_vp, viewport, max_vp)))`
    pub fn responsive_height(&self, viewport_width: f64) -> f64 {
        if !viewport_width.is_finite() {
            return f64::from(self.default_height);
        }
        let width = viewport_width.clamp(f64::from(self.min_viewport), f64::from(self.max_viewport));
        (self.height_ratio * width)
            .round()
            .clamp(f64::from(self.min_height), f64::from(self.max_height))
    }
}

/// How an artifact's height is decided for its lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SizingPolicy {
    Fixed { height: f64 },
    Responsive(SizingConfig),
}

impl SizingPolicy {
    /// Decide the policy for `layout` and prepare the layout for it: a
    /// responsive chart loses its explicit width and is forced to autosize.
    pub fn prepare(layout: &mut Layout, config: &SizingConfig) -> Self {
        match layout.height {
            Some(height) => SizingPolicy::Fixed { height },
            None => {
                layout.width = None;
                layout.autosize = Some(true);
                SizingPolicy::Responsive(config.clone())
            }
        }
    }

    pub fn height_for(&self, viewport_width: f64) -> f64 {
        match self {
            SizingPolicy::Fixed { height } => *height,
            SizingPolicy::Responsive(config) => config.responsive_height(viewport_width),
        }
    }

    /// Height of the frame before the runtime has measured anything
    pub fn initial_height(&self) -> f64 {
        match self {
            SizingPolicy::Fixed { height } => *height,
            SizingPolicy::Responsive(config) => f64::from(config.default_height),
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, SizingPolicy::Fixed { .. })
    }
}

/// Re-renders on mount and resize: full reconciliation, native resize, then
/// container height sync.
pub struct SizingController {
    policy: SizingPolicy,
}

impl SizingController {
    pub fn new(policy: SizingPolicy) -> Self {
        Self { policy }
    }
}

impl EventHandler for SizingController {
    fn name(&self) -> &'static str {
        "sizing"
    }

    fn handle(&mut self, event: &ChartEvent, _state: &RenderState) -> Vec<RenderCommand> {
        match event {
            ChartEvent::Mount { viewport_width } | ChartEvent::Resize { viewport_width } => {
                let height = self.policy.height_for(*viewport_width);
                vec![
                    RenderCommand::React { height },
                    RenderCommand::NativeResize,
                    RenderCommand::SyncContainerHeight { height },
                ]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responsive_height_bounds() {
        let config = SizingConfig::default();
        assert_eq!(config.responsive_height(100.0), 280.0);
        assert_eq!(config.responsive_height(280.0), 280.0);
        assert_eq!(config.responsive_height(600.0), 360.0);
        assert_eq!(config.responsive_height(1400.0), 560.0);
        assert_eq!(config.responsive_height(4000.0), 560.0);
        assert_eq!(config.responsive_height(f64::NAN), 420.0);
    }

    #[test]
    fn test_prepare_fixed_keeps_layout() {
        let mut layout = Layout {
            height: Some(300.0),
            width: Some(900.0),
            ..Default::default()
        };
        let policy = SizingPolicy::prepare(&mut layout, &SizingConfig::default());
        assert_eq!(policy, SizingPolicy::Fixed { height: 300.0 });
        assert_eq!(layout.width, Some(900.0));
        assert_eq!(layout.autosize, None);
    }

    #[test]
    fn test_prepare_responsive_clears_width() {
        let mut layout = Layout {
            width: Some(900.0),
            ..Default::default()
        };
        let policy = SizingPolicy::prepare(&mut layout, &SizingConfig::default());
        assert!(!policy.is_fixed());
        assert_eq!(layout.width, None);
        assert_eq!(layout.autosize, Some(true));
        assert_eq!(policy.initial_height(), 420.0);
    }

    #[test]
    fn test_policy_serializes_with_mode_tag() {
        let fixed = serde_json::to_value(SizingPolicy::Fixed { height: 300.0 }).unwrap();
        assert_eq!(fixed, serde_json::json!({"mode": "fixed", "height": 300.0}));
        let responsive = serde_json::to_value(SizingPolicy::Responsive(SizingConfig::default())).unwrap();
        assert_eq!(responsive["mode"], "responsive");
        assert_eq!(responsive["max_height"], 560);
    }

    #[test]
    fn test_validate() {
        assert!(SizingConfig::default().validate().is_ok());
        let bad = SizingConfig {
            height_ratio: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
