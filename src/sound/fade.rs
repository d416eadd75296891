/// What happens to a sound once its fade completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FadeAction {
    #[default]
    None,
    Pause,
    Stop,
}

/// Linear gain ramp.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Fade {
    active: bool,
    timer: f32,
    duration: f32,
    start_gain: f32,
    end_gain: f32,
    action: FadeAction,
}

/// Result of advancing a fade by one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FadeStep {
    pub gain: f32,
    /// Set on the tick the fade completes
    pub completed: Option<FadeAction>,
}

impl Fade {
    /// Fade in ramps from silence to 1.0, fade out from `current_gain` to 0.0.
    pub fn start(fade_in: bool, duration: f32, current_gain: f32, action: FadeAction) -> Self {
        let (start_gain, end_gain) = if fade_in {
            (0.0, 1.0)
        } else {
            (current_gain, 0.0)
        };
        Self {
            active: true,
            timer: 0.0,
            duration: duration.max(0.0),
            start_gain,
            end_gain,
            action,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start_gain(&self) -> f32 {
        self.start_gain
    }

    pub fn cancel(&mut self) {
        self.active = false;
    }

    pub fn advance(&mut self, dt: f32) -> Option<FadeStep> {
        if !self.active {
            return None;
        }
        self.timer += dt.max(0.0);
        if self.timer >= self.duration {
            self.active = false;
            return Some(FadeStep {
                gain: self.end_gain,
                completed: Some(self.action),
            });
        }
        let t = self.timer / self.duration;
        Some(FadeStep {
            gain: self.start_gain + (self.end_gain - self.start_gain) * t,
            completed: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fade: &mut Fade, ticks: &[f32]) -> Vec<FadeStep> {
        ticks.iter().filter_map(|dt| fade.advance(*dt)).collect()
    }

    #[test]
    fn fade_in_converges_regardless_of_tick_size() {
        let mut coarse = Fade::start(true, 1.0, 0.3, FadeAction::None);
        let mut fine = coarse;

        let coarse_steps = run(&mut coarse, &[1.5]);
        let fine_steps = run(&mut fine, &[0.1; 12]);

        assert_eq!(coarse_steps.last().unwrap().gain, 1.0);
        assert_eq!(fine_steps.last().unwrap().gain, 1.0);
        assert!(!coarse.is_active());
        assert!(!fine.is_active());
    }

    #[test]
    fn action_runs_exactly_once() {
        let mut fade = Fade::start(false, 0.5, 0.8, FadeAction::Stop);
        let steps = run(&mut fade, &[0.25, 0.25, 0.25, 0.25]);
        let completions: Vec<_> = steps.iter().filter_map(|s| s.completed).collect();
        assert_eq!(completions, vec![FadeAction::Stop]);
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn fade_out_starts_from_current_gain() {
        let mut fade = Fade::start(false, 2.0, 0.8, FadeAction::None);
        let step = fade.advance(1.0).unwrap();
        assert!((step.gain - 0.4).abs() < 1e-6);
        assert!(step.completed.is_none());
    }

    #[test]
    fn zero_duration_completes_on_first_tick() {
        let mut fade = Fade::start(true, 0.0, 0.0, FadeAction::Pause);
        let step = fade.advance(0.0).unwrap();
        assert_eq!(step.gain, 1.0);
        assert_eq!(step.completed, Some(FadeAction::Pause));
    }
}
