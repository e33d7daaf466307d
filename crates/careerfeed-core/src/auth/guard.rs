//! Route guard for protected and public surfaces.
//!
//! The decision itself is a pure function of the published [`AuthState`].
//! [`RouteGuard`] adds the one-shot redirect flag: a redirect is issued once
//! per set of inputs, and re-evaluating with unchanged inputs (the router
//! re-rendering after navigation) yields `Redirecting` instead of a second
//! redirect.

use super::session::AuthState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Unauthenticated entry surface
    Welcome,
    /// Authenticated home surface
    Dashboard,
}

impl Surface {
    pub fn path(self) -> &'static str {
        match self {
            Surface::Welcome => "/welcome",
            Surface::Dashboard => "/dashboard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Not hydrated yet; show a neutral placeholder.
    Loading,
    Render,
    Redirect(Surface),
    /// A redirect was already issued for these inputs; keep showing the placeholder.
    Redirecting,
}

/// Where a hydrated state must be sent, if anywhere.
pub fn required_redirect(requires_auth: bool, state: &AuthState) -> Option<Surface> {
    match (requires_auth, state.is_authenticated()) {
        (true, false) => Some(Surface::Welcome),
        (false, true) => Some(Surface::Dashboard),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GuardInputs {
    hydrated: bool,
    authenticated: bool,
}

impl GuardInputs {
    fn of(state: &AuthState) -> Self {
        Self {
            hydrated: state.hydrated,
            authenticated: state.is_authenticated(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    requires_auth: bool,
    last_inputs: Option<GuardInputs>,
    has_redirected: bool,
}

impl RouteGuard {
    pub fn new(requires_auth: bool) -> Self {
        Self {
            requires_auth,
            last_inputs: None,
            has_redirected: false,
        }
    }

    /// Guard for surfaces that need a session (the dashboard).
    pub fn protected() -> Self {
        Self::new(true)
    }

    /// Guard for surfaces only shown to signed-out users (welcome, login).
    pub fn public() -> Self {
        Self::new(false)
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    pub fn evaluate(&mut self, state: &AuthState) -> GuardDecision {
        let inputs = GuardInputs::of(state);
        if self.last_inputs != Some(inputs) {
            self.last_inputs = Some(inputs);
            self.has_redirected = false;
        }

        if !state.hydrated {
            return GuardDecision::Loading;
        }

        match required_redirect(self.requires_auth, state) {
            None => GuardDecision::Render,
            Some(_) if self.has_redirected => GuardDecision::Redirecting,
            Some(surface) => {
                self.has_redirected = true;
                GuardDecision::Redirect(surface)
            }
        }
    }
}
