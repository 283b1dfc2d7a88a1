use mapgeox_core::{Arrival, StopEta, TrackingSnapshot};
use mapgeox_transit::prelude::*;
use serde_json::json;

fn stop_name<'a>(entry: &'a CatalogEntry, stop_id: &'a StopIdentifier) -> &'a str {
    if *stop_id == StopIdentifier::start() {
        return &entry.origin.name;
    }
    if *stop_id == StopIdentifier::end() {
        return &entry.destination.name;
    }
    entry
        .stops
        .iter()
        .find(|stop| stop.stop_id == *stop_id)
        .map_or(stop_id.as_str(), |stop| stop.name.as_str())
}

fn status(eta: &StopEta) -> String {
    if eta.reached {
        return "reached".to_string();
    }
    match (&eta.eta, eta.minutes_label()) {
        (Some(at), Some(minutes)) => format!("{minutes} ({at})"),
        (None, Some(minutes)) => minutes,
        _ => "pending".to_string(),
    }
}

/// One line per stop, in route order.
pub fn render_snapshot(entry: &CatalogEntry, snapshot: &TrackingSnapshot) -> String {
    let mut out = String::new();

    let position = match &snapshot.location {
        Some(location) => format!(
            "bus at {:.5},{:.5} {:.0} km/h",
            location.location.y(),
            location.location.x(),
            location.speed_kmh
        ),
        None => "waiting for position".to_string(),
    };
    let link = if snapshot.connected { "" } else { " [offline]" };
    out.push_str(&format!("== {} | {}{}\n", entry.route_id, position, link));

    let width = snapshot
        .stops
        .iter()
        .map(|eta| stop_name(entry, &eta.stop_id).len())
        .max()
        .unwrap_or(0);

    for eta in &snapshot.stops {
        out.push_str(&format!(
            "  {:<width$}  {}\n",
            stop_name(entry, &eta.stop_id),
            status(eta),
            width = width
        ));
    }
    out
}

/// Snapshot as one JSON line, tagged for consumers reading a mixed stream.
pub fn snapshot_json(snapshot: &TrackingSnapshot) -> serde_json::Result<String> {
    let data = serde_json::to_value(snapshot)?;
    Ok(json!({ "type": "snapshot", "data": data }).to_string())
}

pub fn arrival_json(arrival: &Arrival) -> serde_json::Result<String> {
    let data = serde_json::to_value(arrival)?;
    Ok(json!({ "type": "arrival", "data": data }).to_string())
}
