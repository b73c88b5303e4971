/// Site scoping and enable/disable gating
///
/// Toggle commands switch detection on and off per site. Sites outside the
/// configured scope are ignored entirely.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Sites remembered only for the one-time audio notice
pub const MAX_TRACKED_SITES: usize = 1024;

/// Allow-list of site ids; empty means every site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteScope {
    sites: BTreeSet<String>,
}

impl SiteScope {
    pub fn new<I, S>(sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sites: sites.into_iter().map(Into::into).collect(),
        }
    }

    /// Scope accepting every site
    pub fn all() -> Self {
        Self::default()
    }

    pub fn accepts(&self, site_id: &str) -> bool {
        self.sites.is_empty() || self.sites.contains(site_id)
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.sites.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SiteState {
    enabled: bool,
    first_audio: bool,
}

/// Per-site enabled flags
///
/// Only sites whose state differs from the default are stored.
#[derive(Debug)]
pub struct SiteGate {
    scope: SiteScope,
    enabled_by_default: bool,
    sites: HashMap<String, SiteState>,
}

impl SiteGate {
    pub fn new(scope: SiteScope, enabled_by_default: bool) -> Self {
        Self {
            scope,
            enabled_by_default,
            sites: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &SiteScope {
        &self.scope
    }

    fn default_state(&self) -> SiteState {
        SiteState {
            enabled: self.enabled_by_default,
            first_audio: true,
        }
    }

    fn state(&self, site_id: &str) -> SiteState {
        self.sites
            .get(site_id)
            .copied()
            .unwrap_or_else(|| self.default_state())
    }

    /// Enable or disable a site; returns false if the site is out of scope
    ///
    /// Enabling re-arms the one-time "receiving audio" notice.
    pub fn set_enabled(&mut self, site_id: &str, enabled: bool) -> bool {
        if !self.scope.accepts(site_id) {
            debug!("Ignoring toggle for out-of-scope site {}", site_id);
            return false;
        }

        let mut state = self.state(site_id);
        state.enabled = enabled;
        if enabled {
            state.first_audio = true;
        }

        if state == self.default_state() {
            self.sites.remove(site_id);
        } else {
            self.sites.insert(site_id.to_string(), state);
        }

        debug!("{} {}", if enabled { "Enabled" } else { "Disabled" }, site_id);
        true
    }

    /// True if audio from `site_id` should reach the detectors
    pub fn is_enabled(&self, site_id: &str) -> bool {
        self.scope.accepts(site_id) && self.state(site_id).enabled
    }

    /// True exactly once per enable for each site
    ///
    /// Once `MAX_TRACKED_SITES` sites are stored, new sites get no notice.
    pub fn take_first_audio(&mut self, site_id: &str) -> bool {
        if let Some(state) = self.sites.get_mut(site_id) {
            return std::mem::replace(&mut state.first_audio, false);
        }

        if self.sites.len() >= MAX_TRACKED_SITES {
            return false;
        }

        let state = SiteState {
            first_audio: false,
            ..self.default_state()
        };
        self.sites.insert(site_id.to_string(), state);
        true
    }

    /// Number of sites with non-default state
    pub fn tracked_sites(&self) -> usize {
        self.sites.len()
    }
}
