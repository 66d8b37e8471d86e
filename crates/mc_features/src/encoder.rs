//! Feature encoder fitted on the training table.
//!
//! The encoder is stored alongside every trained model, so a model always
//! sees rosters and uploads encoded with the statistics it was trained on.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::table::{Dataset, PlayerRow};
use crate::{FeatureError, Result, STAT_COLUMNS};

pub const TEAM_SIZE: usize = 5;
/// Stats plus hero win rate for one side.
pub const SIDE_WIDTH: usize = STAT_COLUMNS.len() + 1;
/// Radiant side, dire side, duration.
pub const FEATURE_WIDTH: usize = 2 * SIDE_WIDTH + 1;

const NEUTRAL_WIN_RATE: f64 = 0.5;

type Stats = [f64; 9];

/// One roster slot of a single-match prediction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub account_id: i64,
    pub hero_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    profiles: BTreeMap<i64, Stats>,
    hero_win_rates: BTreeMap<String, f64>,
    baseline: Stats,
    median_duration: f64,
}

impl FeatureEncoder {
    /// Learn per-account averages, smoothed hero win rates, the baseline
    /// profile and the median match duration.
    pub fn fit(dataset: &Dataset) -> Result<Self> {
        if dataset.is_empty() {
            return Err(FeatureError::Fit("training table is empty".into()));
        }

        let mut account_sums: BTreeMap<i64, (Stats, usize)> = BTreeMap::new();
        let mut hero_games: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        let mut total = [0.0; 9];
        let mut durations = Vec::with_capacity(dataset.len());

        for rec in dataset.records() {
            let stats = rec.player.stats();
            let entry = account_sums.entry(rec.account_id).or_insert(([0.0; 9], 0));
            add_into(&mut entry.0, &stats);
            entry.1 += 1;
            add_into(&mut total, &stats);

            let hero = hero_games
                .entry(rec.player.hero_name.clone())
                .or_insert((0, 0));
            hero.0 += usize::from(rec.player_won());
            hero.1 += 1;

            durations.push(rec.player.duration);
        }

        let profiles = account_sums
            .into_iter()
            .map(|(id, (sums, n))| (id, scaled(&sums, n)))
            .collect();
        let hero_win_rates = hero_games
            .into_iter()
            .map(|(hero, (wins, games))| (hero, (wins as f64 + 1.0) / (games as f64 + 2.0)))
            .collect();

        durations.sort_by(f64::total_cmp);
        let mid = durations.len() / 2;
        let median_duration = if durations.len() % 2 == 0 {
            (durations[mid - 1] + durations[mid]) / 2.0
        } else {
            durations[mid]
        };

        Ok(Self {
            profiles,
            hero_win_rates,
            baseline: scaled(&total, dataset.len()),
            median_duration,
        })
    }

    /// Average stats for an account, or the baseline profile when unknown.
    pub fn profile(&self, account_id: i64) -> &Stats {
        self.profiles.get(&account_id).unwrap_or(&self.baseline)
    }

    pub fn hero_win_rate(&self, hero_name: &str) -> f64 {
        self.hero_win_rates
            .get(hero_name.trim())
            .copied()
            .unwrap_or(NEUTRAL_WIN_RATE)
    }

    pub fn known_accounts(&self) -> usize {
        self.profiles.len()
    }

    /// One feature row per player row. The player's own side carries its
    /// stats; the opposing side carries the baseline profile.
    pub fn encode_records<'a, I>(&self, rows: I) -> Array2<f64>
    where
        I: IntoIterator<Item = &'a PlayerRow>,
        I::IntoIter: ExactSizeIterator,
    {
        let rows = rows.into_iter();
        let mut out = Array2::zeros((rows.len(), FEATURE_WIDTH));

        for (i, row) in rows.enumerate() {
            let own = (row.stats(), self.hero_win_rate(&row.hero_name));
            let other = (self.baseline, NEUTRAL_WIN_RATE);
            let (radiant, dire) = if row.is_radiant { (own, other) } else { (other, own) };

            write_side(&mut out, i, 0, &radiant.0, radiant.1);
            write_side(&mut out, i, SIDE_WIDTH, &dire.0, dire.1);
            out[[i, FEATURE_WIDTH - 1]] = row.duration;
        }
        out
    }

    /// A single feature row for a match between two five-player rosters.
    pub fn encode_match(&self, radiant: &[RosterEntry], dire: &[RosterEntry]) -> Result<Array2<f64>> {
        check_roster("radiant_team", radiant)?;
        check_roster("dire_team", dire)?;

        let mut out = Array2::zeros((1, FEATURE_WIDTH));
        let (stats, win_rate) = self.side_summary(radiant);
        write_side(&mut out, 0, 0, &stats, win_rate);
        let (stats, win_rate) = self.side_summary(dire);
        write_side(&mut out, 0, SIDE_WIDTH, &stats, win_rate);
        out[[0, FEATURE_WIDTH - 1]] = self.median_duration;
        Ok(out)
    }

    fn side_summary(&self, roster: &[RosterEntry]) -> (Stats, f64) {
        let mut sums = [0.0; 9];
        let mut win_rate = 0.0;
        for slot in roster {
            add_into(&mut sums, self.profile(slot.account_id));
            win_rate += self.hero_win_rate(&slot.hero_name);
        }
        (scaled(&sums, roster.len()), win_rate / roster.len() as f64)
    }
}

fn check_roster(side: &str, roster: &[RosterEntry]) -> Result<()> {
    if roster.len() != TEAM_SIZE {
        return Err(FeatureError::Roster(format!(
            "{side} must have exactly {TEAM_SIZE} players, got {}",
            roster.len()
        )));
    }
    if let Some(slot) = roster.iter().position(|e| e.hero_name.trim().is_empty()) {
        return Err(FeatureError::Roster(format!(
            "{side} slot {} has an empty hero_name",
            slot + 1
        )));
    }
    Ok(())
}

fn write_side(out: &mut Array2<f64>, row: usize, offset: usize, stats: &Stats, win_rate: f64) {
    for (j, value) in stats.iter().enumerate() {
        out[[row, offset + j]] = *value;
    }
    out[[row, offset + stats.len()]] = win_rate;
}

fn add_into(acc: &mut Stats, values: &Stats) {
    for (a, v) in acc.iter_mut().zip(values) {
        *a += v;
    }
}

fn scaled(sums: &Stats, n: usize) -> Stats {
    let mut out = *sums;
    for v in &mut out {
        *v /= n as f64;
    }
    out
}
