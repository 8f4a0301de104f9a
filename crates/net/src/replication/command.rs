use super::state::{ObjectId, ReplicatedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

/// A request targeting one object, carrying a typed payload and an
/// application-defined code. The first accept or reject wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    code: u16,
    state: ReplicatedState<'static>,
    decision: Decision,
}

impl Command {
    pub fn new(code: u16, state: ReplicatedState<'static>) -> Self {
        Self {
            code,
            state,
            decision: Decision::Pending,
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn target(&self) -> ObjectId {
        self.state.object_id()
    }

    pub fn state(&self) -> &ReplicatedState<'static> {
        &self.state
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn accept(&mut self) {
        if self.decision == Decision::Pending {
            self.decision = Decision::Accepted;
        }
    }

    pub fn reject(&mut self) {
        if self.decision == Decision::Pending {
            self.decision = Decision::Rejected;
        }
    }

    pub fn is_handled(&self) -> bool {
        self.decision != Decision::Pending
    }

    pub fn is_validated(&self) -> bool {
        self.decision == Decision::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        Command::new(4, ReplicatedState::new(ObjectId::new(2)).with(1u8).unwrap())
    }

    #[test]
    fn test_starts_pending() {
        let cmd = command();
        assert_eq!(cmd.decision(), Decision::Pending);
        assert!(!cmd.is_handled());
        assert_eq!(cmd.target(), ObjectId::new(2));
    }

    #[test]
    fn test_first_decision_is_final() {
        let mut cmd = command();
        cmd.reject();
        cmd.accept();
        assert!(cmd.is_handled());
        assert!(!cmd.is_validated());

        let mut cmd = command();
        cmd.accept();
        cmd.reject();
        assert!(cmd.is_validated());
    }
}
