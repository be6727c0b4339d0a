//! Static / animated mode: constant tables, preprocessor defines and the
//! accumulation policy that goes with each mode.

use serde::{Deserialize, Serialize};

use super::accumulation::AccumulationPolicy;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Unbounded progressive accumulation, full sampling budgets.
    #[default]
    Static,
    /// Bounded temporal window with ReSTIR reuse, halved budgets.
    Animated,
}

impl Mode {
    pub fn from_animated(animated: bool) -> Self {
        if animated { Self::Animated } else { Self::Static }
    }

    pub fn is_animated(self) -> bool {
        self == Self::Animated
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Animated => "animated",
        }
    }
}

/// Sampling budgets emitted as `const` declarations into the trace program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantTable {
    pub max_bounces: u32,
    pub max_diff_bounces: u32,
    pub max_spec_bounces: u32,
    pub max_trans_bounces: u32,
    pub max_scattering_events: u32,
    pub marching_steps: u32,
    pub fudge_factor: f32,
    pub sample_lights: bool,
    pub light_path_length: u32,
    pub render_mode: u32,
}

impl ConstantTable {
    pub const STATIC: ConstantTable = ConstantTable {
        max_bounces: 12,
        max_diff_bounces: 4,
        max_spec_bounces: 4,
        max_trans_bounces: 12,
        max_scattering_events: 12,
        marching_steps: 128,
        fudge_factor: 0.9,
        sample_lights: true,
        light_path_length: 2,
        render_mode: 0,
    };

    pub const ANIMATED: ConstantTable = ConstantTable {
        max_bounces: 6,
        max_diff_bounces: 2,
        max_spec_bounces: 2,
        max_trans_bounces: 6,
        max_scattering_events: 6,
        marching_steps: 64,
        fudge_factor: 0.9,
        sample_lights: true,
        light_path_length: 1,
        render_mode: 1,
    };

    /// Declaration lines, one constant per line.
    pub fn lines(&self) -> Vec<String> {
        let ints = [
            ("MAX_BOUNCES", self.max_bounces),
            ("MAX_DIFF_BOUNCES", self.max_diff_bounces),
            ("MAX_SPEC_BOUNCES", self.max_spec_bounces),
            ("MAX_TRANS_BOUNCES", self.max_trans_bounces),
            ("MAX_SCATTERING_EVENTS", self.max_scattering_events),
            ("MARCHING_STEPS", self.marching_steps),
        ];
        let mut lines: Vec<String> = ints
            .iter()
            .map(|(name, value)| format!("const int {name} = {value};"))
            .collect();
        // Debug formatting keeps the decimal point on whole numbers.
        lines.push(format!("const float FUDGE_FACTOR = {:?};", self.fudge_factor));
        lines.push(format!("const bool sample_lights = {};", self.sample_lights));
        lines.push(format!("const int LIGHT_PATH_LENGTH = {};", self.light_path_length));
        lines.push(format!("const int RENDER_MODE = {};", self.render_mode));
        lines
    }
}

impl Default for ConstantTable {
    fn default() -> Self {
        Self::STATIC
    }
}

/// Optional features of the trace program. Disabled ones are emitted commented out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderDefines {
    pub cubemap: bool,
    pub procedural_sky: bool,
    pub biased_sampling: bool,
    pub bidirectional: bool,
}

impl Default for ShaderDefines {
    fn default() -> Self {
        Self {
            cubemap: true,
            procedural_sky: false,
            biased_sampling: true,
            bidirectional: false,
        }
    }
}

impl ShaderDefines {
    pub const RESTIR: &'static str = "USE_RESTIR";

    /// Define lines; `USE_RESTIR` is appended when `restir` is set.
    pub fn lines(&self, restir: bool) -> Vec<String> {
        let flags = [
            ("USE_CUBEMAP", self.cubemap),
            ("USE_PROCEDURAL_SKY", self.procedural_sky),
            ("USE_BIASED_SAMPLING", self.biased_sampling),
            ("USE_BIDIRECTIONAL", self.bidirectional),
        ];
        let mut lines: Vec<String> = flags
            .iter()
            .map(|(name, on)| if *on { format!("#define {name}") } else { format!("//#define {name}") })
            .collect();
        if restir {
            lines.push(format!("#define {}", Self::RESTIR));
        }
        lines
    }
}

/// Owns the active mode and both constant tables.
#[derive(Clone, Debug)]
pub struct ModeController {
    mode: Mode,
    defines: ShaderDefines,
    static_constants: ConstantTable,
    animated_constants: ConstantTable,
    temporal_frames: u32,
}

impl ModeController {
    pub fn new(
        mode: Mode,
        defines: ShaderDefines,
        static_constants: ConstantTable,
        animated_constants: ConstantTable,
        temporal_frames: u32,
    ) -> Self {
        Self { mode, defines, static_constants, animated_constants, temporal_frames }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Commit a mode. Returns whether it changed.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        let changed = self.mode != mode;
        self.mode = mode;
        changed
    }

    pub fn constants_for(&self, mode: Mode) -> &ConstantTable {
        match mode {
            Mode::Static => &self.static_constants,
            Mode::Animated => &self.animated_constants,
        }
    }

    pub fn active_constants(&self) -> &ConstantTable {
        self.constants_for(self.mode)
    }

    pub fn restir_enabled(&self) -> bool {
        self.mode.is_animated()
    }

    pub fn define_lines(&self, mode: Mode) -> Vec<String> {
        self.defines.lines(mode.is_animated())
    }

    pub fn constant_lines(&self, mode: Mode) -> Vec<String> {
        self.constants_for(mode).lines()
    }

    pub fn temporal_frames(&self) -> u32 {
        self.temporal_frames
    }

    pub fn accumulation_policy(&self) -> AccumulationPolicy {
        match self.mode {
            Mode::Static => AccumulationPolicy::Progressive,
            Mode::Animated => AccumulationPolicy::FixedWindow { temporal_frames: self.temporal_frames },
        }
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new(Mode::Static, ShaderDefines::default(), ConstantTable::STATIC, ConstantTable::ANIMATED, 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_changes_budget() {
        let mut modes = ModeController::default();
        assert_eq!(modes.active_constants().max_bounces, 12);
        assert!(!modes.restir_enabled());

        assert!(modes.set_mode(Mode::Animated));
        assert_eq!(modes.active_constants().max_bounces, 6);
        assert!(modes.restir_enabled());
        assert_eq!(
            modes.accumulation_policy(),
            AccumulationPolicy::FixedWindow { temporal_frames: 8 }
        );
        assert!(!modes.set_mode(Mode::Animated));
    }

    #[test]
    fn test_constant_lines() {
        let lines = ConstantTable::STATIC.lines();
        assert_eq!(lines[0], "const int MAX_BOUNCES = 12;");
        assert!(lines.contains(&"const float FUDGE_FACTOR = 0.9;".to_string()));
        assert!(lines.contains(&"const bool sample_lights = true;".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("const int RENDER_MODE = 0;"));

        let table = ConstantTable { fudge_factor: 1.0, ..ConstantTable::ANIMATED };
        assert!(table.lines().contains(&"const float FUDGE_FACTOR = 1.0;".to_string()));
    }

    #[test]
    fn test_restir_define_follows_mode() {
        let modes = ModeController::default();
        let stat = modes.define_lines(Mode::Static);
        let anim = modes.define_lines(Mode::Animated);
        assert_eq!(stat, ["#define USE_CUBEMAP", "//#define USE_PROCEDURAL_SKY", "#define USE_BIASED_SAMPLING", "//#define USE_BIDIRECTIONAL"]);
        assert_eq!(anim.len(), stat.len() + 1);
        assert_eq!(anim.last().map(String::as_str), Some("#define USE_RESTIR"));
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(serde_json::to_string(&Mode::Animated).unwrap(), "\"animated\"");
        let table: ConstantTable = serde_json::from_str(r#"{ "max_bounces": 3 }"#).unwrap();
        assert_eq!(table.max_bounces, 3);
        assert_eq!(table.marching_steps, 128);
    }
}
