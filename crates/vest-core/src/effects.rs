//! Built-in haptic pattern library.
//!
//! Each pattern recreates one of the vendor SDK's predefined effects. A step
//! holds for its pulse duration plus any pause before the next step.

use vest_types::{CellId, EffectCategory, EffectInfo, EffectPattern, EffectStep, Intensity};

use crate::error::{Error, Result};

const FRONT_UPPER: [CellId; 2] = [CellId::FRONT_UPPER_LEFT, CellId::FRONT_UPPER_RIGHT];
const FRONT_LOWER: [CellId; 2] = [CellId::FRONT_LOWER_LEFT, CellId::FRONT_LOWER_RIGHT];
const BACK_UPPER: [CellId; 2] = [CellId::BACK_UPPER_LEFT, CellId::BACK_UPPER_RIGHT];
const BACK_LOWER: [CellId; 2] = [CellId::BACK_LOWER_LEFT, CellId::BACK_LOWER_RIGHT];
const HEART: [CellId; 2] = [CellId::FRONT_UPPER_LEFT, CellId::FRONT_LOWER_LEFT];

fn step(cells: &[CellId], speed: u8, duration_ms: u64) -> EffectStep {
    EffectStep::new(cells, Intensity::from_level(speed), duration_ms)
}

fn step_then_pause(cells: &[CellId], speed: u8, duration_ms: u64, pause_ms: u64) -> EffectStep {
    step(cells, speed, duration_ms + pause_ms)
}

fn pattern(
    name: &str,
    display_name: &str,
    category: EffectCategory,
    description: &str,
    steps: Vec<EffectStep>,
) -> EffectPattern {
    EffectPattern {
        name: name.to_string(),
        display_name: display_name.to_string(),
        category,
        description: description.to_string(),
        steps,
    }
}

fn rapid_fire(upper: &[CellId], lower: &[CellId]) -> Vec<EffectStep> {
    let mut steps: Vec<EffectStep> = (0..6)
        .map(|i| {
            let cells = if i % 2 == 0 { upper } else { lower };
            step_then_pause(cells, 6, 50, 30)
        })
        .collect();
    if let Some(last) = steps.last_mut() {
        last.hold_ms = 50;
    }
    steps
}

fn weapons() -> Vec<EffectPattern> {
    use EffectCategory::Weapons;
    vec![
        pattern(
            "machinegun_front",
            "Machine Gun (Front)",
            Weapons,
            "Rapid fire pulses to front",
            rapid_fire(&FRONT_UPPER, &FRONT_LOWER),
        ),
        pattern(
            "machinegun_back",
            "Machine Gun (Back)",
            Weapons,
            "Rapid fire pulses to back",
            rapid_fire(&BACK_UPPER, &BACK_LOWER),
        ),
        pattern(
            "pistol_front",
            "Pistol (Front)",
            Weapons,
            "Single handgun shot to front",
            vec![step(&FRONT_UPPER, 5, 80)],
        ),
        pattern(
            "pistol_back",
            "Pistol (Back)",
            Weapons,
            "Single handgun shot to back",
            vec![step(&BACK_UPPER, 5, 80)],
        ),
        pattern(
            "shotgun_front",
            "Shotgun (Front)",
            Weapons,
            "Heavy shotgun blast to front",
            vec![step(&CellId::FRONT, 8, 150)],
        ),
        pattern(
            "shotgun_back",
            "Shotgun (Back)",
            Weapons,
            "Heavy shotgun blast to back",
            vec![step(&CellId::BACK, 8, 150)],
        ),
        pattern(
            "rifle_front",
            "Rifle (Front)",
            Weapons,
            "Rifle shot to front",
            vec![step(&FRONT_UPPER, 7, 100), step(&FRONT_LOWER, 5, 50)],
        ),
        pattern(
            "rifle_back",
            "Rifle (Back)",
            Weapons,
            "Rifle shot to back",
            vec![step(&BACK_UPPER, 7, 100), step(&BACK_LOWER, 5, 50)],
        ),
    ]
}

fn impacts() -> Vec<EffectPattern> {
    use EffectCategory::Impacts;
    vec![
        pattern(
            "big_blast_front",
            "Big Blast (Front)",
            Impacts,
            "Large explosion impact to front",
            vec![
                step(&CellId::FRONT, 10, 200),
                step(&CellId::FRONT, 7, 150),
                step(&CellId::FRONT, 4, 100),
            ],
        ),
        pattern(
            "big_blast_back",
            "Big Blast (Back)",
            Impacts,
            "Large explosion impact to back",
            vec![
                step(&CellId::BACK, 10, 200),
                step(&CellId::BACK, 7, 150),
                step(&CellId::BACK, 4, 100),
            ],
        ),
        pattern(
            "small_blast_front",
            "Small Blast (Front)",
            Impacts,
            "Small explosion impact to front",
            vec![step(&CellId::FRONT, 6, 100), step(&FRONT_UPPER, 3, 50)],
        ),
        pattern(
            "small_blast_back",
            "Small Blast (Back)",
            Impacts,
            "Small explosion impact to back",
            vec![step(&CellId::BACK, 6, 100), step(&BACK_UPPER, 3, 50)],
        ),
        pattern(
            "left_side_hit",
            "Left Side Hit",
            Impacts,
            "Impact from the left",
            vec![step(&CellId::LEFT_SIDE, 7, 150)],
        ),
        pattern(
            "right_side_hit",
            "Right Side Hit",
            Impacts,
            "Impact from the right",
            vec![step(&CellId::RIGHT_SIDE, 7, 150)],
        ),
    ]
}

fn melee() -> Vec<EffectPattern> {
    use EffectCategory::Melee;
    vec![
        pattern(
            "punch_front",
            "Punch (Front)",
            Melee,
            "Punch impact to front",
            vec![step(&FRONT_LOWER, 7, 100)],
        ),
        pattern(
            "punch_back",
            "Punch (Back)",
            Melee,
            "Punch impact to back",
            vec![step(&BACK_LOWER, 7, 100)],
        ),
        pattern(
            "stab_front",
            "Stab (Front)",
            Melee,
            "Stab impact to front",
            vec![
                step(&[CellId::FRONT_LOWER_LEFT], 9, 80),
                step(&[CellId::FRONT_LOWER_LEFT, CellId::FRONT_UPPER_LEFT], 5, 100),
            ],
        ),
        pattern(
            "stab_back",
            "Stab (Back)",
            Melee,
            "Stab impact to back",
            vec![
                step(&[CellId::BACK_LOWER_LEFT], 9, 80),
                step(&[CellId::BACK_LOWER_LEFT, CellId::BACK_UPPER_LEFT], 5, 100),
            ],
        ),
    ]
}

fn driving() -> Vec<EffectPattern> {
    use EffectCategory::Driving;
    vec![
        pattern(
            "acceleration",
            "Acceleration",
            Driving,
            "G-force pushing back",
            vec![
                step(&FRONT_UPPER, 3, 100),
                step(&FRONT_LOWER, 4, 100),
                step(&BACK_UPPER, 5, 150),
                step(&BACK_LOWER, 6, 200),
            ],
        ),
        pattern(
            "deceleration",
            "Deceleration",
            Driving,
            "G-force pushing forward",
            vec![
                step(&BACK_LOWER, 3, 100),
                step(&BACK_UPPER, 4, 100),
                step(&FRONT_LOWER, 5, 150),
                step(&FRONT_UPPER, 6, 200),
            ],
        ),
        // Turning pushes the body toward the outside of the curve.
        pattern(
            "left_turn",
            "Left Turn",
            Driving,
            "G-force from turning left",
            vec![step(&CellId::RIGHT_SIDE, 5, 300)],
        ),
        pattern(
            "right_turn",
            "Right Turn",
            Driving,
            "G-force from turning right",
            vec![step(&CellId::LEFT_SIDE, 5, 300)],
        ),
    ]
}

fn special() -> Vec<EffectPattern> {
    use EffectCategory::Special;
    vec![
        pattern(
            "heartbeat",
            "Heartbeat",
            Special,
            "Low health heartbeat pulse",
            vec![
                step_then_pause(&HEART, 4, 100, 50),
                step_then_pause(&HEART, 3, 80, 400),
                step_then_pause(&HEART, 4, 100, 50),
                step(&HEART, 3, 80),
            ],
        ),
        pattern(
            "full_body_pulse",
            "Full Body Pulse",
            Special,
            "Single pulse across entire vest",
            vec![step(&CellId::ALL, 6, 200)],
        ),
        pattern(
            "death",
            "Death",
            Special,
            "Death/respawn effect",
            vec![
                step(&CellId::ALL, 10, 300),
                step(&CellId::ALL, 7, 200),
                step(&CellId::ALL, 4, 150),
                step(&CellId::FRONT, 2, 100),
            ],
        ),
        pattern(
            "spawn",
            "Spawn",
            Special,
            "Respawn/start effect",
            vec![
                step(&FRONT_LOWER, 3, 100),
                step(&CellId::FRONT, 5, 100),
                step(&CellId::ALL, 4, 150),
                step(&CellId::ALL, 2, 100),
            ],
        ),
    ]
}

/// All built-in patterns, grouped by category.
#[must_use]
pub fn builtin_effects() -> Vec<EffectPattern> {
    let mut effects = weapons();
    effects.extend(impacts());
    effects.extend(melee());
    effects.extend(driving());
    effects.extend(special());
    effects
}

/// Named patterns available to `play_effect`.
#[derive(Debug, Clone)]
pub struct EffectLibrary {
    effects: Vec<EffectPattern>,
}

impl Default for EffectLibrary {
    fn default() -> Self {
        Self {
            effects: builtin_effects(),
        }
    }
}

impl EffectLibrary {
    /// Built-ins followed by `custom` patterns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a custom pattern is invalid or reuses a
    /// name already in the library.
    pub fn with_custom(custom: &[EffectPattern]) -> Result<Self> {
        let mut library = Self::default();
        for effect in custom {
            library.insert(effect.clone())?;
        }
        Ok(library)
    }

    fn insert(&mut self, effect: EffectPattern) -> Result<()> {
        effect.validate().map_err(Error::Config)?;
        if self.get(&effect.name).is_some() {
            return Err(Error::Config(format!(
                "effect '{}' is already defined",
                effect.name
            )));
        }
        self.effects.push(effect);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EffectPattern> {
        self.effects.iter().find(|e| e.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectPattern> {
        self.effects.iter()
    }

    /// Listing entries in library order.
    #[must_use]
    pub fn infos(&self) -> Vec<EffectInfo> {
        self.effects.iter().map(EffectInfo::from).collect()
    }

    /// Categories that have at least one pattern, in declaration order.
    #[must_use]
    pub fn categories(&self) -> Vec<EffectCategory> {
        EffectCategory::ALL
            .into_iter()
            .filter(|c| self.effects.iter().any(|e| e.category == *c))
            .collect()
    }
}
