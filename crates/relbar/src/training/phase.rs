//! Training phases and the skip plan.

use std::fmt;

/// Training phases, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Phase {
    PretrainGenerator,
    PretrainDiscriminator,
    Adversarial,
    Terminated,
}

impl Phase {
    /// The phase after this one. `Terminated` is absorbing.
    pub fn next(self) -> Phase {
        match self {
            Phase::PretrainGenerator => Phase::PretrainDiscriminator,
            Phase::PretrainDiscriminator => Phase::Adversarial,
            Phase::Adversarial | Phase::Terminated => Phase::Terminated,
        }
    }

    /// Label used for checkpoint directories.
    pub fn checkpoint_label(self) -> &'static str {
        match self {
            Phase::PretrainGenerator => "MLE",
            Phase::PretrainDiscriminator => "DIS",
            Phase::Adversarial => "ADV",
            Phase::Terminated => "FINAL",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::PretrainGenerator => "PRETRAIN_G",
            Phase::PretrainDiscriminator => "PRETRAIN_D",
            Phase::Adversarial => "ADV",
            Phase::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Which phases are skipped because pretrained weights were supplied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhasePlan {
    pub generator_pretrained: bool,
    pub discriminator_pretrained: bool,
}

impl PhasePlan {
    pub fn should_run(&self, phase: Phase) -> bool {
        match phase {
            Phase::PretrainGenerator => !self.generator_pretrained,
            Phase::PretrainDiscriminator => !self.discriminator_pretrained,
            Phase::Adversarial => true,
            Phase::Terminated => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        let mut phase = Phase::PretrainGenerator;
        let mut visited = vec![phase];
        while phase != Phase::Terminated {
            phase = phase.next();
            visited.push(phase);
        }
        assert_eq!(
            visited,
            [
                Phase::PretrainGenerator,
                Phase::PretrainDiscriminator,
                Phase::Adversarial,
                Phase::Terminated
            ]
        );
        assert_eq!(Phase::Terminated.next(), Phase::Terminated);
    }

    #[test]
    fn test_plan_guards() {
        let plan = PhasePlan {
            generator_pretrained: true,
            discriminator_pretrained: false,
        };
        assert!(!plan.should_run(Phase::PretrainGenerator));
        assert!(plan.should_run(Phase::PretrainDiscriminator));
        assert!(plan.should_run(Phase::Adversarial));
        assert!(!plan.should_run(Phase::Terminated));
    }

    #[test]
    fn test_labels() {
        assert_eq!(Phase::Adversarial.to_string(), "ADV");
        assert_eq!(Phase::PretrainGenerator.checkpoint_label(), "MLE");
    }
}
