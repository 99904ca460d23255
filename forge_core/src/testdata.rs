use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubtaskType {
    Sum,
    Min,
    Mul,
}

impl FromStr for SubtaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" | "" => Ok(SubtaskType::Sum),
            "min" => Ok(SubtaskType::Min),
            "mul" => Ok(SubtaskType::Mul),
            other => Err(Error::TestData(format!("unknown subtask type `{}`", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Testcase {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Subtask {
    pub kind: SubtaskType,
    /// Points out of 100. Weights are whatever the rule declares; the
    /// overall score is capped later, not here.
    pub weight: f64,
    pub cases: Vec<Testcase>,
}

/// Loads the ordered subtask list for one test-data package: either
/// from `data_rule.txt` or, in its absence, by pairing same-stem
/// input/answer files into a single full-weight sum subtask.
pub fn load(dir: &Path) -> Result<Vec<Subtask>> {
    if !dir.is_dir() {
        return Err(Error::TestData(format!("no such directory: {:?}", dir)));
    }

    let rule_path = dir.join("data_rule.txt");
    let subtasks = if rule_path.is_file() {
        parse_rule(&fs::read_to_string(rule_path)?, dir)?
    } else {
        pair_files(dir)?
    };

    if subtasks.is_empty() {
        return Err(Error::TestData(format!("no usable testcases in {:?}", dir)));
    }
    Ok(subtasks)
}

/// `data_rule.txt`: non-empty lines; the last two are input/output
/// filename templates with a `#` placeholder; each preceding line is
/// one subtask, an optional `type:weight` prefix followed by case
/// indices.
fn parse_rule(text: &str, dir: &Path) -> Result<Vec<Subtask>> {
    let text = text.replace('\r', "");
    let lines: Vec<&str> = text.split('\n').filter(|l| !l.is_empty()).collect();

    if lines.len() < 3 {
        return Err(Error::TestData("invalid data_rule.txt".to_string()));
    }

    let input_template = lines[lines.len() - 2];
    let output_template = lines[lines.len() - 1];
    let subtask_count = lines.len() - 2;
    let default_weight = 100.0 / subtask_count as f64;

    let mut subtasks = Vec::new();
    for line in &lines[..subtask_count] {
        let mut tokens: Vec<&str> = line.split(' ').filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            continue;
        }

        let (kind, weight) = if tokens[0].contains(':') {
            let mut halves = tokens[0].splitn(2, ':');
            let kind: SubtaskType = halves.next().unwrap_or_default().parse()?;
            let weight = halves
                .next()
                .and_then(|w| w.parse::<f64>().ok())
                // `parse` accepts nan/inf, which must never reach the
                // accumulators
                .filter(|w| w.is_finite() && *w != 0.0)
                .unwrap_or(default_weight);
            tokens.remove(0);
            (kind, weight)
        } else {
            (SubtaskType::Sum, 100.0)
        };

        let cases = tokens
            .iter()
            .map(|index| Testcase {
                // only the first placeholder is substituted
                input: dir.join(input_template.replacen('#', index, 1)),
                output: dir.join(output_template.replacen('#', index, 1)),
            })
            .collect::<Vec<_>>();

        if !cases.is_empty() {
            subtasks.push(Subtask {
                kind,
                weight,
                cases,
            });
        }
    }

    Ok(subtasks)
}

/// Fallback mode: every `<stem>.in` with a matching `<stem>.out` or
/// `<stem>.ans` becomes one case of a single sum subtask, ordered by
/// the last integer in the filename. Unpaired files are ignored.
fn pair_files(dir: &Path) -> Result<Vec<Subtask>> {
    let names: BTreeSet<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();

    let mut cases = Vec::new();
    for name in &names {
        let stem = match name.strip_suffix(".in") {
            Some(stem) => stem,
            None => continue,
        };
        for ext in &["out", "ans"] {
            let answer = format!("{}.{}", stem, ext);
            if names.contains(&answer) {
                cases.push(Testcase {
                    input: dir.join(name),
                    output: dir.join(answer),
                });
            }
        }
    }

    let re = Regex::new(r"(\d+)\D*$").unwrap();
    let last_integer = move |p: &Path| -> i64 {
        let s = p.to_string_lossy();
        re.captures(&s)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(-1)
    };
    cases.sort_by_key(|c| last_integer(&c.input));

    if cases.is_empty() {
        return Ok(vec![]);
    }
    Ok(vec![Subtask {
        kind: SubtaskType::Sum,
        weight: 100.0,
        cases,
    }])
}
