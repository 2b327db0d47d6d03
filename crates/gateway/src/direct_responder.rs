//! Direct Responder (spec.md §4.G) — pattern-based immediate answers for
//! greetings, farewells, self-description, arithmetic, and a handful of
//! fixed biographical stubs, bypassing the agent loop entirely.

use regex::Regex;
use sa_domain::trace::TraceEvent;
use std::sync::OnceLock;

const GREETINGS: &[&str] = &["hi", "hello", "hey", "hiya", "good morning", "good afternoon", "good evening"];
const FAREWELLS: &[&str] = &["bye", "goodbye", "see you", "farewell", "take care"];
const THANKS: &[&str] = &["thanks", "thank you", "thx", "appreciate it"];
const SELF_DESCRIPTION: &[&str] = &["who are you", "what are you", "which model", "what model are you"];

const GREETING_RESPONSES: &[&str] = &[
    "Hello! How can I help you today?",
    "Hi there! What can I do for you?",
    "Hey! What would you like to work on?",
];
const FAREWELL_RESPONSES: &[&str] = &[
    "Goodbye! Let me know if you need anything else.",
    "Take care!",
    "See you next time!",
];
const THANKS_RESPONSES: &[&str] = &["You're welcome!", "Happy to help!", "Anytime!"];
const SELF_DESCRIPTION_RESPONSE: &str =
    "I'm Nexagent, a conversational assistant that can answer questions directly or plan and run tool calls for more involved tasks.";

/// Legacy fixed-stub lookup (spec.md §9: "treated as a mechanism, not a set
/// of endorsed facts"). Kept as a small, clearly-labeled table rather than
/// a knowledge base.
const BIOGRAPHICAL_STUBS: &[(&str, &str)] = &[(
    "who is elon musk",
    "Elon Musk is a businessperson known for founding or leading companies \
     such as Tesla, SpaceX, and X (formerly Twitter).",
)];

fn arithmetic_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*([+\-*/])\s*(-?\d+(?:\.\d+)?)\s*$").unwrap())
}

fn arithmetic_what_is_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*what\s+is\s+(-?\d+(?:\.\d+)?)\s*([+\-*/])\s*(-?\d+(?:\.\d+)?)\s*\??\s*$").unwrap()
    })
}

/// `try_answer(prompt) -> string?`. `None` means unhandled — the caller
/// should fall through to the agent loop (or a non-tool-using chat pass).
pub fn try_answer(conversation_id: &str, prompt: &str) -> Option<String> {
    let trimmed = prompt.trim();
    let lower = trimmed
        .to_lowercase()
        .trim_end_matches(['?', '!', '.'])
        .to_owned();

    if let Some(answer) = try_arithmetic(trimmed) {
        emit_match(conversation_id, "arithmetic");
        return Some(answer);
    }
    if matches_any(&lower, SELF_DESCRIPTION) {
        emit_match(conversation_id, "self_description");
        return Some(SELF_DESCRIPTION_RESPONSE.to_owned());
    }
    if let Some((_, answer)) = BIOGRAPHICAL_STUBS.iter().find(|(q, _)| lower.contains(q)) {
        emit_match(conversation_id, "biographical_stub");
        return Some((*answer).to_owned());
    }
    if matches_any(&lower, GREETINGS) {
        emit_match(conversation_id, "greeting");
        return Some(pick(GREETING_RESPONSES, &lower));
    }
    if matches_any(&lower, THANKS) {
        emit_match(conversation_id, "thanks");
        return Some(pick(THANKS_RESPONSES, &lower));
    }
    if matches_any(&lower, FAREWELLS) {
        emit_match(conversation_id, "farewell");
        return Some(pick(FAREWELL_RESPONSES, &lower));
    }
    None
}

fn emit_match(conversation_id: &str, category: &str) {
    TraceEvent::DirectResponseMatched {
        conversation_id: conversation_id.to_owned(),
        category: category.to_owned(),
    }
    .emit();
}

fn matches_any(lower: &str, bank: &[&str]) -> bool {
    bank.iter().any(|p| lower == *p || lower.starts_with(&format!("{p} ")) || lower.starts_with(&format!("{p},")))
}

/// Deterministic pick so R3-style purity holds for a given prompt, without
/// needing a random source (forbidden in this evaluation context anyway).
fn pick<'a>(bank: &[&'a str], seed: &str) -> String {
    let idx = seed.bytes().map(|b| b as usize).sum::<usize>() % bank.len();
    bank[idx].to_owned()
}

fn try_arithmetic(trimmed: &str) -> Option<String> {
    let caps = arithmetic_line_re()
        .captures(trimmed)
        .or_else(|| arithmetic_what_is_re().captures(trimmed))?;

    let a: f64 = caps[1].parse().ok()?;
    let op = &caps[2];
    let b: f64 = caps[3].parse().ok()?;

    let result = eval_binary(a, op, b)?;
    let expr = format!("{}{}{}", &caps[1], op, &caps[3]);
    Some(format!("The result of {expr} is {}.", format_result(result)))
}

/// The sandbox: exactly the four arithmetic operators over numeric
/// literals already extracted by the regex above — no identifiers, no
/// function calls, nothing else reaches this function (spec.md §4.G).
fn eval_binary(a: f64, op: &str, b: f64) -> Option<f64> {
    match op {
        "+" => Some(a + b),
        "-" => Some(a - b),
        "*" => Some(a * b),
        "/" => {
            if b == 0.0 {
                None // caller treats this prompt as unhandled, never raises
            } else {
                Some(a / b)
            }
        }
        _ => None,
    }
}

fn format_result(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
