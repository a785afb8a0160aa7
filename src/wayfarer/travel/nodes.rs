// SPDX-License-Identifier: MIT

//! Deterministic executors for the travel-planning graph
//!
//! Every executor reads the state, never mutates it, and returns a partial
//! update. Prices come from the fixed tables in [`super::pricing`].

use super::lookup::LookupCache;
use super::pricing::{
    self, Destination, DEFAULT_DESTINATION, MONTHS, OTHER_COSTS, PEAK_HOLIDAYS, RESTRICTED,
};
use crate::wayfarer::workflow::registry::NodeRegistry;
use crate::wayfarer::workflow::state::{ControlPatch, HumanDecision, StateUpdate, WorkflowState};
use crate::wdk::node::{executor_fn, NodeExecutor, NodeResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::error::Error;
use std::sync::Arc;

const DEFAULT_DAYS: u32 = 5;
/// Longest trip planned; longer requests are cut to this
pub const MAX_DAYS: u32 = 60;
const MAX_TRAVELERS: u32 = 50;
const DEFAULT_BUDGET: f64 = 5000.0;
const DEFAULT_TRAVELERS: u32 = 2;

const INTERNATIONAL_DOCUMENTS: &[&str] = &[
    "passport valid for six months",
    "visa for the destination",
    "flight booking",
    "hotel booking",
];
const DOMESTIC_DOCUMENTS: &[&str] = &["national ID card"];

/// Loop counter of the itinerary refinement loop
pub const ITINERARY_COUNTER: &str = "itinerary";
/// Score at which an itinerary is good enough
pub const ITINERARY_TARGET: f64 = 0.85;
const ITINERARY_BASE_SCORE: f64 = 0.6;
const ITINERARY_SCORE_STEP: f64 = 0.15;
const ITINERARY_MAX_SCORE: f64 = 0.95;
const ITINERARY_ASPECTS: &[&str] = &[
    "shorter routes between sights",
    "local restaurants for each day",
    "faster transport between areas",
    "balanced sightseeing and rest",
];

/// Share of the overspend luxury trips can give up per optimization pass
const LUXURY_SAVINGS_RATE: f64 = 0.3;
/// Reduction applied when a human accepts the adjusted plan
const ACCEPT_REDUCTION: f64 = 0.2;
/// Beyond this multiple of the budget no optimization is attempted
const HOPELESS_FACTOR: f64 = 5.0;
/// Still above this multiple after optimizing means a human has to look
const ESCALATE_FACTOR: f64 = 2.0;

const REQUIREMENT_KEYWORDS: &[(&str, &[&str])] = &[
    ("luxury", &["luxury", "luxurious", "premium", "first-class"]),
    ("family", &["family", "kids", "children"]),
    ("culture", &["culture", "cultural", "history", "historic", "museum"]),
    ("nature", &["nature", "hiking", "mountain", "mountains", "lake"]),
    ("food", &["food", "cuisine", "foodie"]),
];

/// Parsed travel request stored under `travel_info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelInfo {
    pub destination: String,
    pub days: u32,
    pub budget: f64,
    pub travelers: u32,
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Holiday or month mentioned for departure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure: Option<String>,
}

impl TravelInfo {
    fn wants(&self, requirement: &str) -> bool {
        self.requirements.iter().any(|r| r == requirement)
    }

    fn place(&self) -> &'static Destination {
        pricing::lookup(&self.destination)
    }

    fn nights(&self) -> u32 {
        self.days.saturating_sub(1).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub flight: f64,
    pub hotel: f64,
    pub daily: f64,
    pub other: f64,
}

impl CostBreakdown {
    fn total(&self) -> f64 {
        self.flight + self.hotel + self.daily + self.other
    }

    /// Scale every item down by `rate`, never below its floor
    fn reduce(&self, rate: f64) -> Self {
        let cut = |cost: f64, floor: f64| (cost * (1.0 - rate)).floor().max(floor);
        Self {
            flight: cut(self.flight, 300.0),
            hotel: cut(self.hotel, 100.0),
            daily: cut(self.daily, 80.0),
            other: cut(self.other, 50.0),
        }
    }

    fn scale(&self, factor: f64) -> Self {
        Self {
            flight: (self.flight * factor).round(),
            hotel: (self.hotel * factor).round(),
            daily: (self.daily * factor).round(),
            other: (self.other * factor).round(),
        }
    }
}

/// Estimate stored under `cost_analysis`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAnalysis {
    pub total_cost: f64,
    pub budget: f64,
    pub breakdown: CostBreakdown,
    #[serde(default)]
    pub optimized: bool,
    #[serde(default)]
    pub adjusted: bool,
}

impl CostAnalysis {
    fn new(breakdown: CostBreakdown, budget: f64) -> Self {
        Self {
            total_cost: breakdown.total(),
            budget,
            breakdown,
            optimized: false,
            adjusted: false,
        }
    }

    fn overspend(&self) -> f64 {
        self.total_cost - self.budget
    }
}

fn read<T: for<'de> Deserialize<'de>>(
    state: &WorkflowState,
    field: &str,
) -> Result<T, Box<dyn Error + Send + Sync>> {
    let value = state
        .get(field)
        .ok_or_else(|| format!("state field '{}' is not set", field))?;
    Ok(serde_json::from_value(value.clone())?)
}

fn message(text: impl Into<String>) -> Value {
    json!([text.into()])
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Number directly followed by one of `units`, e.g. "5 days"
fn number_before(tokens: &[String], units: &[&str]) -> Option<f64> {
    tokens
        .windows(2)
        .find(|w| units.contains(&w[1].as_str()))
        .and_then(|w| w[0].parse().ok())
}

/// First number within two tokens after `keyword`, e.g. "budget of 8000"
fn number_after(tokens: &[String], keyword: &str) -> Option<f64> {
    let at = tokens.iter().position(|t| t == keyword)?;
    tokens
        .iter()
        .skip(at + 1)
        .take(2)
        .find_map(|t| t.parse().ok())
}

fn departure_in(lowered: &str, words: &[String]) -> Option<String> {
    PEAK_HOLIDAYS
        .iter()
        .find(|h| lowered.contains(*h))
        .or_else(|| MONTHS.iter().find(|m| words.iter().any(|w| w == *m)))
        .map(|d| d.to_string())
}

/// Extract destination, length, budget, party size and requirements from the query
pub fn parse_intent(state: &WorkflowState) -> NodeResult {
    let query = state.get_str("query").unwrap_or_default();
    let lowered = query.to_lowercase();
    let words = tokens(query);

    if let Some(place) = RESTRICTED.iter().find(|p| lowered.contains(*p)) {
        return Ok(StateUpdate::new()
            .set(
                "travel_info",
                json!({
                    "destination": place,
                    "days": DEFAULT_DAYS,
                    "budget": DEFAULT_BUDGET,
                    "travelers": DEFAULT_TRAVELERS,
                    "requirements": [],
                }),
            )
            .set("budget", DEFAULT_BUDGET));
    }

    let destination = pricing::find_in(&lowered)
        .map(|d| d.key)
        .unwrap_or(DEFAULT_DESTINATION);
    let days = number_before(&words, &["day", "days", "nights"])
        .filter(|d| *d >= 1.0)
        .map(|d| d.min(f64::from(MAX_DAYS)) as u32)
        .unwrap_or(DEFAULT_DAYS);
    let budget = number_after(&words, "budget")
        .or_else(|| number_before(&words, &["yuan", "rmb", "cny"]))
        .unwrap_or(DEFAULT_BUDGET);
    let travelers = number_before(
        &words,
        &["people", "persons", "travelers", "travellers", "adults", "pax"],
    )
    .filter(|n| *n >= 1.0)
    .map(|n| n.min(f64::from(MAX_TRAVELERS)) as u32)
    .unwrap_or(DEFAULT_TRAVELERS);
    let requirements: Vec<String> = REQUIREMENT_KEYWORDS
        .iter()
        .filter(|(_, keys)| words.iter().any(|w| keys.contains(&w.as_str())))
        .map(|(name, _)| name.to_string())
        .collect();

    let info = TravelInfo {
        destination: destination.to_string(),
        days,
        budget,
        travelers,
        requirements,
        departure: departure_in(&lowered, &words),
    };
    let summary = format!(
        "Planning {} days in {} for {} travelers with a budget of {}",
        info.days,
        info.place().name,
        info.travelers,
        info.budget
    );
    Ok(StateUpdate::new()
        .set("travel_info", serde_json::to_value(&info)?)
        .set("budget", info.budget)
        .set("messages", message(summary)))
}

pub fn validate_budget(state: &WorkflowState) -> NodeResult {
    let info: TravelInfo = read(state, "travel_info")?;
    if info.budget <= 0.0 {
        return Err(format!("budget must be positive, got {}", info.budget).into());
    }

    let recommended = (f64::from(info.place().daily) + 200.0) * f64::from(info.days);
    let verdict = if info.budget >= recommended {
        "sufficient"
    } else {
        "tight"
    };
    Ok(StateUpdate::new().set(
        "messages",
        message(format!(
            "Budget {} is {} (recommended at least {})",
            info.budget, verdict, recommended
        )),
    ))
}

pub fn check_destination(state: &WorkflowState) -> NodeResult {
    let info: TravelInfo = read(state, "travel_info")?;
    if RESTRICTED.contains(&info.destination.as_str()) {
        return Err(format!("travel to {} is currently restricted", info.destination).into());
    }
    Ok(StateUpdate::new().set(
        "messages",
        message(format!("{} is open for travel", info.place().name)),
    ))
}

/// Season of the departure. Holidays are peak season; no date means unknown.
pub fn verify_travel_time(state: &WorkflowState) -> NodeResult {
    let info: TravelInfo = read(state, "travel_info")?;
    let (season, note) = match info.departure.as_deref() {
        None => (
            "unknown",
            "No departure date given; confirm dates before booking".to_string(),
        ),
        Some(when) if PEAK_HOLIDAYS.contains(&when) => (
            "peak_season",
            format!("Departing around {} is peak season; book early", when),
        ),
        Some(when) => ("normal_season", format!("Departing in {} is off peak", when)),
    };
    Ok(StateUpdate::new()
        .set(
            "travel_window",
            json!({ "departure": info.departure, "season": season }),
        )
        .set("messages", message(note)))
}

/// Travel documents the destination calls for
pub fn check_documents(state: &WorkflowState) -> NodeResult {
    let info: TravelInfo = read(state, "travel_info")?;
    let place = info.place();
    let (scope, required) = if place.is_international() {
        ("international", INTERNATIONAL_DOCUMENTS)
    } else if place.is_known() {
        ("domestic", DOMESTIC_DOCUMENTS)
    } else {
        ("unknown", [].as_slice())
    };
    let note = if required.is_empty() {
        format!("Confirm the entry requirements for {}", info.destination)
    } else {
        format!("{} travel needs: {}", place.name, required.join(", "))
    };
    Ok(StateUpdate::new()
        .set("documents", json!({ "scope": scope, "required": required }))
        .set("messages", message(note)))
}

pub fn query_flights(state: &WorkflowState) -> NodeResult {
    let info: TravelInfo = read(state, "travel_info")?;
    let place = info.place();
    let (price, class) = if info.wants("luxury") {
        ((f64::from(place.flight.1) * 1.8).round(), "business")
    } else {
        (pricing::midpoint(place.flight), "economy")
    };
    Ok(StateUpdate::new()
        .set(
            "flight",
            json!({ "destination": place.key, "price": price, "class": class }),
        )
        .set("messages", message(format!("Flight to {}: {}", place.name, price))))
}

pub fn query_hotels(state: &WorkflowState) -> NodeResult {
    let info: TravelInfo = read(state, "travel_info")?;
    let place = info.place();
    let mut per_night = if info.wants("luxury") {
        f64::from(place.hotel.1) * 2.0
    } else {
        pricing::midpoint(place.hotel)
    };
    if info.travelers >= 4 {
        per_night *= 1.5;
    } else if info.travelers == 3 || info.wants("family") {
        per_night *= 1.3;
    }
    let per_night = per_night.round();
    let nights = info.nights();
    let total = per_night * f64::from(nights);
    Ok(StateUpdate::new()
        .set(
            "hotel",
            json!({ "price_per_night": per_night, "nights": nights, "total_price": total }),
        )
        .set(
            "messages",
            message(format!("Hotel in {}: {} nights at {}", place.name, nights, per_night)),
        ))
}

pub fn query_attractions(state: &WorkflowState) -> NodeResult {
    let info: TravelInfo = read(state, "travel_info")?;
    let sights = info.place().sights();
    let daily_plans: Vec<String> = (0..info.days as usize)
        .map(|day| format!("Day {}: {}", day + 1, sights[day % sights.len()]))
        .collect();
    let picks: Vec<&str> = sights.iter().take(info.days as usize + 2).copied().collect();
    Ok(StateUpdate::new()
        .set(
            "attractions",
            json!({ "attractions": picks, "daily_plans": daily_plans }),
        )
        .set(
            "messages",
            message(format!("{} sights found", picks.len())),
        ))
}

/// Join the lookups into a cost estimate
pub fn aggregate_costs(state: &WorkflowState) -> NodeResult {
    let info: TravelInfo = read(state, "travel_info")?;
    let flight = state
        .get_f64("flight.price")
        .ok_or("flight lookup produced no price")?;
    let hotel = state
        .get_f64("hotel.total_price")
        .ok_or("hotel lookup produced no price")?;
    let breakdown = CostBreakdown {
        flight,
        hotel,
        daily: f64::from(info.place().daily) * f64::from(info.days),
        other: OTHER_COSTS,
    };
    let analysis = CostAnalysis::new(breakdown, info.budget);
    let summary = format!(
        "Estimated total {} against a budget of {}",
        analysis.total_cost, analysis.budget
    );
    Ok(StateUpdate::new()
        .set("cost_analysis", serde_json::to_value(&analysis)?)
        .set("messages", message(summary)))
}

/// One optimization pass over the estimate.
///
/// Sets `budgetSatisfied` once the estimate fits, or `needsHumanIntervention`
/// when the gap is too large to close automatically. The loop counter itself
/// is left to the engine.
pub fn optimize_budget(state: &WorkflowState) -> NodeResult {
    let info: TravelInfo = read(state, "travel_info")?;
    let analysis: CostAnalysis = read(state, "cost_analysis")?;
    let budget = analysis.budget;

    if analysis.total_cost <= budget {
        return Ok(StateUpdate::new()
            .with_control(ControlPatch {
                budget_satisfied: Some(true),
                ..Default::default()
            })
            .set("messages", message("Estimate fits the budget")));
    }

    if analysis.total_cost > budget * HOPELESS_FACTOR {
        return Ok(StateUpdate::new()
            .with_control(ControlPatch {
                needs_human_intervention: Some(true),
                ..Default::default()
            })
            .set(
                "messages",
                message(format!(
                    "Estimate {} is more than {} times the budget; a realistic budget starts near {}",
                    analysis.total_cost,
                    HOPELESS_FACTOR,
                    (analysis.total_cost * 0.7).round()
                )),
            ));
    }

    let overspend = analysis.overspend();
    let savings_rate = if info.wants("luxury") && overspend > budget * 0.5 {
        LUXURY_SAVINGS_RATE
    } else {
        1.0
    };
    let reduction = overspend * savings_rate / analysis.total_cost;
    let breakdown = analysis.breakdown.reduce(reduction);
    let optimized = CostAnalysis {
        total_cost: breakdown.total(),
        budget,
        breakdown,
        optimized: true,
        adjusted: analysis.adjusted,
    };

    let satisfied = optimized.total_cost <= budget;
    let escalate = optimized.total_cost > budget * ESCALATE_FACTOR;
    let summary = format!(
        "Optimized estimate from {} to {}",
        analysis.total_cost, optimized.total_cost
    );
    Ok(StateUpdate::new()
        .set("cost_analysis", serde_json::to_value(&optimized)?)
        .with_control(ControlPatch {
            budget_satisfied: Some(satisfied),
            needs_human_intervention: escalate.then_some(true),
            human_decision: None,
        })
        .set("messages", message(summary)))
}

/// One refinement pass over the day plans.
///
/// The score rises with each pass the engine has counted on the itinerary
/// loop; the router compares it against the target.
pub fn optimize_itinerary(state: &WorkflowState) -> NodeResult {
    let pass = state.control().attempts(ITINERARY_COUNTER).saturating_add(1);
    let raw = ITINERARY_BASE_SCORE + f64::from(pass) * ITINERARY_SCORE_STEP;
    let score = (raw.min(ITINERARY_MAX_SCORE) * 100.0).round() / 100.0;
    let aspect = ITINERARY_ASPECTS[(pass as usize - 1) % ITINERARY_ASPECTS.len()];
    let satisfied = score >= ITINERARY_TARGET;
    Ok(StateUpdate::new()
        .set(
            "itinerary_review",
            json!({ "pass": pass, "score": score, "focus": aspect, "satisfied": satisfied }),
        )
        .set(
            "messages",
            message(format!(
                "Itinerary pass {} ({}) scored {:.2} against {:.2}",
                pass, aspect, score, ITINERARY_TARGET
            )),
        ))
}

/// Lay out the options before the session parks for a decision
pub fn prepare_review(state: &WorkflowState) -> NodeResult {
    let analysis: CostAnalysis = read(state, "cost_analysis")?;
    let overspend = analysis.overspend().max(0.0);
    Ok(StateUpdate::new().set(
        "messages",
        message(format!(
            "Estimate {} exceeds the budget {} by {}. Choose: 1 accept (cut {}%), 2 keep the plan, 3 terminate",
            analysis.total_cost,
            analysis.budget,
            overspend,
            ACCEPT_REDUCTION * 100.0
        )),
    ))
}

/// Act on the recorded human decision
pub fn apply_decision(state: &WorkflowState) -> NodeResult {
    match state.control().human_decision {
        HumanDecision::Accept => {
            let analysis: CostAnalysis = read(state, "cost_analysis")?;
            let breakdown = analysis.breakdown.scale(1.0 - ACCEPT_REDUCTION);
            let adjusted = CostAnalysis {
                total_cost: breakdown.total(),
                budget: analysis.budget,
                breakdown,
                optimized: analysis.optimized,
                adjusted: true,
            };
            let summary = format!(
                "Adjusted plan accepted, estimate now {}",
                adjusted.total_cost
            );
            Ok(StateUpdate::new()
                .set("cost_analysis", serde_json::to_value(&adjusted)?)
                .set("messages", message(summary)))
        }
        HumanDecision::Keep => {
            Ok(StateUpdate::new().set("messages", message("Keeping the current plan")))
        }
        HumanDecision::Terminate => {
            Ok(StateUpdate::new().set("messages", message("Planning terminated by request")))
        }
        HumanDecision::None => Ok(StateUpdate::new()),
    }
}

pub fn generate_itinerary(state: &WorkflowState) -> NodeResult {
    let info: TravelInfo = read(state, "travel_info")?;
    let analysis: CostAnalysis = read(state, "cost_analysis")?;
    let place = info.place();

    let mut text = format!(
        "{} days in {} for {} travelers\n",
        info.days, place.name, info.travelers
    );
    if !info.requirements.is_empty() {
        text.push_str(&format!("Interests: {}\n", info.requirements.join(", ")));
    }
    text.push('\n');
    if let Some(Value::Array(plans)) = state.get_path("attractions.daily_plans") {
        for plan in plans.iter().filter_map(Value::as_str) {
            text.push_str(plan);
            text.push('\n');
        }
    }
    let b = &analysis.breakdown;
    text.push_str(&format!(
        "\nCosts\n  Flight: {}\n  Hotel: {}\n  Daily expenses: {}\n  Other: {}\n  Total: {} (budget {})\n",
        b.flight, b.hotel, b.daily, b.other, analysis.total_cost, analysis.budget
    ));
    if analysis.adjusted {
        text.push_str("  Includes the accepted adjustment\n");
    }

    Ok(StateUpdate::new()
        .set("itinerary", text)
        .set(
            "itinerary_name",
            format!("{}_{}d_itinerary", place.key, info.days),
        )
        .set("messages", message("Itinerary generated")))
}

/// All travel executors, named as the bundled graph refers to them.
///
/// With a cache, the three lookups are served from it while fresh.
pub fn travel_nodes(cache: Option<&LookupCache>) -> Vec<Arc<dyn NodeExecutor>> {
    let lookup = |name: &'static str, kind: &'static str, f: fn(&WorkflowState) -> NodeResult| {
        match cache {
            Some(cache) => cache.wrap(name, kind, f),
            None => executor_fn(name, f),
        }
    };
    vec![
        executor_fn("parse_intent", parse_intent),
        executor_fn("validate_budget", validate_budget),
        executor_fn("check_destination", check_destination),
        executor_fn("verify_travel_time", verify_travel_time),
        executor_fn("check_documents", check_documents),
        lookup("query_flights", "flight", query_flights),
        lookup("query_hotels", "hotel", query_hotels),
        lookup("query_attractions", "attractions", query_attractions),
        executor_fn("aggregate_costs", aggregate_costs),
        executor_fn("optimize_budget", optimize_budget),
        executor_fn("optimize_itinerary", optimize_itinerary),
        executor_fn("prepare_review", prepare_review),
        executor_fn("apply_decision", apply_decision),
        executor_fn("generate_itinerary", generate_itinerary),
    ]
}

pub async fn register_travel_nodes(registry: &NodeRegistry, cache: Option<&LookupCache>) {
    for executor in travel_nodes(cache) {
        registry.register(executor).await;
    }
}
