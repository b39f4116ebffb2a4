//! Decision actors for `xingsync duplicates`.

use dialoguer::{Confirm, Select};
use xingsync_recon::duplicates::{DuplicateCandidate, DuplicateGroup};
use xingsync_recon::{CrossingKey, Decision, DuplicateKind, GroupId, ResolutionSession, ResolutionUi};

fn candidate_label(kind: DuplicateKind, c: &DuplicateCandidate) -> String {
    let v = &c.values;
    match kind {
        DuplicateKind::Instance => format!(
            "{}: owner={:?} description={:?} location={:?} dwg_ref={:?}",
            c.source, v.owner, v.description, v.location, v.dwg_ref
        ),
        DuplicateKind::LatLong => format!(
            "{}: lat={} long={} zone={} dwg_ref={}",
            c.source, v.lat, v.long, v.zone, v.dwg_ref
        ),
    }
}

fn current_index(group: &DuplicateGroup) -> usize {
    group
        .candidates()
        .iter()
        .position(|c| c.is_canonical)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Interactive
// ---------------------------------------------------------------------------

/// One prompt per group, then a final confirmation. Escape, a declined
/// confirmation, or a terminal error all cancel.
pub struct PromptUi;

impl ResolutionUi for PromptUi {
    fn decide(&mut self, session: &mut ResolutionSession) -> Decision {
        let kind = session.kind();
        let groups: Vec<(GroupId, String, Vec<String>, Vec<_>, usize)> = session
            .groups()
            .iter()
            .map(|g| {
                (
                    g.id,
                    g.crossing.clone(),
                    g.candidates().iter().map(|c| candidate_label(kind, c)).collect(),
                    g.candidates().iter().map(|c| c.id).collect(),
                    current_index(g),
                )
            })
            .collect();
        let total = groups.len();

        for (n, (group, crossing, labels, ids, current)) in groups.into_iter().enumerate() {
            let picked = Select::new()
                .with_prompt(format!("[{}/{total}] {crossing}: choose the canonical entry", n + 1))
                .items(&labels)
                .default(current)
                .interact_opt();
            match picked {
                Ok(Some(i)) => {
                    if let Err(e) = session.select(group, ids[i]) {
                        log::warn!("{e}");
                    }
                }
                Ok(None) => return Decision::Cancel,
                Err(e) => {
                    log::warn!("prompt failed: {e}");
                    return Decision::Cancel;
                }
            }
        }

        match Confirm::new()
            .with_prompt(format!("Apply {total} choice(s)?"))
            .default(true)
            .interact()
        {
            Ok(true) => Decision::Accept,
            Ok(false) => Decision::Cancel,
            Err(e) => {
                log::warn!("prompt failed: {e}");
                Decision::Cancel
            }
        }
    }

    fn rejected(&mut self, invalid: &[GroupId]) {
        eprintln!("{} group(s) need exactly one choice, asking again", invalid.len());
    }
}

// ---------------------------------------------------------------------------
// Scripted (--choose / --accept-defaults)
// ---------------------------------------------------------------------------

/// Applies `KEY=N` choices (1-based candidate number) and accepts.
///
/// Groups without a choice keep their pre-selected entry. A choice naming a
/// candidate that does not exist clears the group, so the decision is
/// rejected rather than silently falling back.
pub struct ScriptedUi {
    choices: Vec<(CrossingKey, usize)>,
}

impl ScriptedUi {
    pub fn new(choices: Vec<(CrossingKey, usize)>) -> Self {
        Self { choices }
    }

    /// Parse `KEY=N`.
    pub fn parse_choice(text: &str) -> Result<(CrossingKey, usize), String> {
        let (key, n) = text
            .rsplit_once('=')
            .ok_or_else(|| format!("expected KEY=N, got '{text}'"))?;
        let key = CrossingKey::from_text(key).ok_or_else(|| format!("blank key in '{text}'"))?;
        let n: usize = n
            .trim()
            .parse()
            .map_err(|_| format!("candidate number in '{text}' is not a positive integer"))?;
        if n == 0 {
            return Err(format!("candidate numbers start at 1, got '{text}'"));
        }
        Ok((key, n))
    }
}

impl ResolutionUi for ScriptedUi {
    fn decide(&mut self, session: &mut ResolutionSession) -> Decision {
        for (key, n) in &self.choices {
            let target = session
                .groups()
                .iter()
                .find(|g| g.key == *key)
                .map(|g| (g.id, g.candidates().get(n - 1).map(|c| c.id)));
            match target {
                Some((group, Some(candidate))) => {
                    if let Err(e) = session.select(group, candidate) {
                        log::warn!("{e}");
                    }
                }
                Some((group, None)) => {
                    log::warn!("{key}: no candidate {n}");
                    let _ = session.clear(group);
                }
                None => log::warn!("{key}: no duplicate group with this key"),
            }
        }
        Decision::Accept
    }

    fn rejected(&mut self, invalid: &[GroupId]) {
        log::warn!("{} group(s) without a valid choice", invalid.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_choice_forms() {
        let (key, n) = ScriptedUi::parse_choice("X04=2").unwrap();
        assert_eq!(key, CrossingKey::from_text("X4").unwrap());
        assert_eq!(n, 2);
        assert!(ScriptedUi::parse_choice("X4").is_err());
        assert!(ScriptedUi::parse_choice("X4=0").is_err());
        assert!(ScriptedUi::parse_choice("=1").is_err());
        assert!(ScriptedUi::parse_choice("X4=two").is_err());
    }
}
