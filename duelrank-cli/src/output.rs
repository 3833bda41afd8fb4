/// Output formatting: terminal tables and JSON.
use std::collections::HashMap;

use anyhow::Result;
use duelrank_core::{Category, ItemId, LeaderboardEntry, RankingEstimate, ViewOrder};
use serde::Serialize;

#[derive(Serialize)]
pub struct JsonRankedItem {
    pub rank: usize,
    pub item: ItemId,
    pub name: String,
    pub strength: f64,
    pub wins: u32,
    pub comparisons: u32,
    pub top_k_probability: Option<f64>,
    pub exact_rank_probability: Option<f64>,
}

#[derive(Serialize)]
pub struct JsonRankOutput {
    pub items: Vec<JsonRankedItem>,
    pub votes_used: usize,
    pub iterations: usize,
    pub converged: bool,
    pub bootstrap_samples: usize,
}

#[derive(Serialize)]
pub struct JsonSimulationOutput {
    pub category: Category,
    pub view: ViewOrder,
    pub voters: usize,
    pub votes: usize,
    pub conflicts_retried: usize,
    pub votes_dropped: usize,
    pub leaderboard: Vec<LeaderboardEntry>,
    /// Bradley-Terry ranking; absent when the fit was superseded.
    pub rankings: Option<JsonRankOutput>,
}

pub fn name_of(names: &HashMap<ItemId, String>, id: ItemId) -> String {
    names.get(&id).cloned().unwrap_or_else(|| format!("#{id}"))
}

fn percent(p: Option<f64>) -> String {
    match p {
        Some(p) => format!("{:.1}%", p * 100.0),
        None => "-".to_string(),
    }
}

pub fn rank_output(estimate: &RankingEstimate, names: &HashMap<ItemId, String>) -> JsonRankOutput {
    JsonRankOutput {
        items: estimate
            .rankings
            .iter()
            .map(|r| JsonRankedItem {
                rank: r.rank + 1,
                item: r.item,
                name: name_of(names, r.item),
                strength: r.strength,
                wins: r.wins,
                comparisons: r.comparisons,
                top_k_probability: r.top_k_probability,
                exact_rank_probability: r.exact_rank_probability,
            })
            .collect(),
        votes_used: estimate.votes_used,
        iterations: estimate.iterations,
        converged: estimate.converged,
        bootstrap_samples: estimate.bootstrap_samples,
    }
}

/// Print the Glicko leaderboard. `true_ranks` adds a column for simulated runs.
pub fn print_leaderboard(
    entries: &[LeaderboardEntry],
    category: Category,
    view: ViewOrder,
    true_ranks: Option<&HashMap<ItemId, usize>>,
) {
    let name_width = entries
        .iter()
        .map(|e| e.url.len())
        .max()
        .unwrap_or(4)
        .max(4);

    let order = match view {
        ViewOrder::BestFirst => "best first",
        ViewOrder::WorstFirst => "worst first",
    };
    println!("Leaderboard ({category}, {order})");
    print!("  # | {:<name_width$} |  Glicko |    RD |  Elo |   W-L   | P(top 5) | P(rank) | Median", "Item");
    if true_ranks.is_some() {
        print!(" | True");
    }
    println!();
    println!("----|-{}-|---------|-------|------|---------|----------|---------|-------", "-".repeat(name_width));

    for e in entries {
        let inactive = if e.active { "" } else { " (inactive)" };
        print!(
            "{:>3} | {:<name_width$} | {:>7.1} | {:>5.1} | {:>4.0} | {:>3}-{:<3} | {:>8} | {:>7} | {:>6}",
            e.rank,
            e.url,
            e.glicko,
            e.rd,
            e.elo,
            e.wins,
            e.losses,
            percent(Some(e.top_k_probability)),
            percent(e.exact_rank_probability),
            e.median_rank,
        );
        if let Some(true_rank) = true_ranks.and_then(|t| t.get(&e.item)) {
            print!(" | {:>4}", true_rank);
        }
        println!("{inactive}");
    }
}

/// Print the Bradley-Terry ranking as a terminal table.
pub fn print_rankings(estimate: &RankingEstimate, names: &HashMap<ItemId, String>, top_k: usize) {
    let name_width = estimate
        .rankings
        .iter()
        .map(|r| name_of(names, r.item).len())
        .max()
        .unwrap_or(4)
        .max(4);

    println!(" # | {:<name_width$} | Strength |  Wins | Games | P(top {top_k}) | P(rank)", "Item");
    println!("---|-{}-|----------|-------|-------|-----------|--------", "-".repeat(name_width));

    for r in &estimate.rankings {
        println!(
            "{:>2} | {:<name_width$} | {:>8.4} | {:>5} | {:>5} | {:>9} | {:>7}",
            r.rank + 1,
            name_of(names, r.item),
            r.strength,
            r.wins,
            r.comparisons,
            percent(r.top_k_probability),
            percent(r.exact_rank_probability),
        );
    }

    let convergence = if estimate.converged {
        format!("converged in {} iterations", estimate.iterations)
    } else {
        format!("did not converge after {} iterations", estimate.iterations)
    };
    println!(
        "\n{} items ranked from {} votes ({convergence}, {} bootstrap samples)",
        estimate.rankings.len(),
        estimate.votes_used,
        estimate.bootstrap_samples,
    );
}

/// Print any serializable report as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use duelrank_core::RankedItem;

    #[test]
    fn test_rank_output_is_one_based_and_named() {
        let estimate = RankingEstimate {
            rankings: vec![
                RankedItem {
                    item: 7,
                    rank: 0,
                    strength: 1.5,
                    wins: 3,
                    comparisons: 4,
                    top_k_probability: Some(0.9),
                    exact_rank_probability: Some(0.8),
                },
                RankedItem {
                    item: 9,
                    rank: 1,
                    strength: 0.5,
                    wins: 1,
                    comparisons: 4,
                    top_k_probability: None,
                    exact_rank_probability: None,
                },
            ],
            votes_used: 4,
            iterations: 12,
            converged: true,
            bootstrap_samples: 0,
        };
        let names = HashMap::from([(7, "seven".to_string())]);

        let out = rank_output(&estimate, &names);
        assert_eq!(out.items[0].rank, 1);
        assert_eq!(out.items[0].name, "seven");
        assert_eq!(out.items[1].name, "#9");

        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["items"][1]["top_k_probability"], serde_json::Value::Null);
        assert_eq!(json["votes_used"], 4);
    }

    #[test]
    fn test_percent_formatting() {
        assert_eq!(percent(Some(0.1234)), "12.3%");
        assert_eq!(percent(None), "-");
    }
}
