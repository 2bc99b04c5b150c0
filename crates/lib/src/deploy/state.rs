//! Checkout phases and the activation state machine.

use std::fmt;

/// Where a checkout is. Logged on every transition; decides which
/// compensating actions run on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckoutPhase {
  Resolving,
  Staging,
  Configuring,
  FilesReconciled,
  UnitRegistered,
  Activated,
  Failed,
  CleanedUp,
}

impl CheckoutPhase {
  pub fn as_str(&self) -> &'static str {
    match self {
      CheckoutPhase::Resolving => "resolving",
      CheckoutPhase::Staging => "staging",
      CheckoutPhase::Configuring => "configuring",
      CheckoutPhase::FilesReconciled => "files-reconciled",
      CheckoutPhase::UnitRegistered => "unit-registered",
      CheckoutPhase::Activated => "activated",
      CheckoutPhase::Failed => "failed",
      CheckoutPhase::CleanedUp => "cleaned-up",
    }
  }

  /// Whether the slot directory may hold content to remove.
  pub fn has_staged(&self) -> bool {
    *self >= CheckoutPhase::Staging && *self < CheckoutPhase::Activated
  }

  /// Whether host files may have been changed.
  pub fn touched_host(&self) -> bool {
    *self >= CheckoutPhase::Configuring && *self < CheckoutPhase::Activated
  }
}

impl fmt::Display for CheckoutPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// How a start failure is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActivationMode {
  /// The failure is reported; the new deployment stays active.
  #[default]
  Plain,
  /// The failure triggers a rollback to the previous deployment.
  Controlled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
  Activating,
  Started,
  StartFailed,
  RollingBack,
  RolledBack,
  RollbackFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationEvent {
  Started,
  StartFailed,
  RollbackStarted,
  RollbackSucceeded,
  RollbackFailed,
}

impl ActivationState {
  /// The state after `event`, or `None` if the event is not valid here.
  pub fn next(self, mode: ActivationMode, event: ActivationEvent) -> Option<Self> {
    use ActivationEvent as E;
    use ActivationState as S;

    match (self, event) {
      (S::Activating, E::Started) => Some(S::Started),
      (S::Activating, E::StartFailed) => Some(S::StartFailed),
      (S::StartFailed, E::RollbackStarted) if mode == ActivationMode::Controlled => Some(S::RollingBack),
      (S::RollingBack, E::RollbackSucceeded) => Some(S::RolledBack),
      (S::RollingBack, E::RollbackFailed) => Some(S::RollbackFailed),
      _ => None,
    }
  }

  pub fn is_terminal(self, mode: ActivationMode) -> bool {
    match self {
      ActivationState::Started | ActivationState::RolledBack | ActivationState::RollbackFailed => true,
      ActivationState::StartFailed => mode == ActivationMode::Plain,
      ActivationState::Activating | ActivationState::RollingBack => false,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ActivationState::Activating => "activating",
      ActivationState::Started => "started",
      ActivationState::StartFailed => "start-failed",
      ActivationState::RollingBack => "rolling-back",
      ActivationState::RolledBack => "rolled-back",
      ActivationState::RollbackFailed => "rollback-failed",
    }
  }
}

impl fmt::Display for ActivationState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
