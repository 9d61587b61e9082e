//! Capability catalogs -- the app tiles unlocked per duty state.
//!
//! Static configuration: the active set is a pure function of `DutyState`.

use serde::Serialize;

use crate::state::DutyState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapability {
    pub app_id: &'static str,
    pub display_name: &'static str,
    pub icon: &'static str,
    pub intent_ids: &'static [&'static str],
}

const fn app(
    app_id: &'static str,
    display_name: &'static str,
    icon: &'static str,
    intent_ids: &'static [&'static str],
) -> AppCapability {
    AppCapability { app_id, display_name, icon, intent_ids }
}

// ---------------------------------------------------------------
//  Static Catalogs
// ---------------------------------------------------------------

pub static GROUND_APPS: &[AppCapability] = &[
    app("com.ops.general", "Ops", "FileText", &["open_doc"]),
    app("com.docs.viewer", "Docs", "Shield", &["open_doc"]),
    app("com.comms.general", "Comms", "Radio", &["call"]),
    app("com.maint.viewer", "Maintenance", "Wrench", &["view_status"]),
    app("com.weather.ground", "Weather", "Cloud", &["view_weather"]),
];

pub static FLIGHT_APPS: &[AppCapability] = &[
    app("com.flight.ops", "Flight Ops", "FileText", &["open_checklist", "show_status"]),
    app("com.flight.nav", "Navigation", "Map", &["route_summary", "wx_overlay"]),
    app("com.flight.checklists", "Checklists", "Shield", &["open_checklist"]),
    app("com.flight.performance", "Performance", "ChartNoAxesCombined", &["calc_perf"]),
    app("com.flight.comms", "Comms", "Radio", &["freq_tune", "call"]),
    app("com.flight.weather", "Weather", "Cloud", &["view_weather", "wx_radar"]),
    app("com.flight.maps", "Flight Maps", "Map", &["show_map"]),
    app("com.flight.security", "Security", "Shield", &["threat_assess"]),
];

/// Catalog for a duty state. OFF_DUTY unlocks nothing.
pub fn catalog_for(state: DutyState) -> &'static [AppCapability] {
    match state {
        DutyState::OffDuty => &[],
        DutyState::OnDuty => GROUND_APPS,
        DutyState::FlightMode => FLIGHT_APPS,
    }
}

/// Ordered app ids for a duty state.
pub fn app_ids_for(state: DutyState) -> Vec<String> {
    catalog_for(state).iter().map(|a| a.app_id.to_string()).collect()
}
