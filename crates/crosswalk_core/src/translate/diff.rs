//! Line-oriented text diff for human review.
//!
//! Shortest edit script (Myers, linear-space bisection): common prefix and
//! suffix are trimmed, then each remaining range is split at the middle snake
//! and diffed recursively. Purely textual; no JSON awareness.

/// Lines of unchanged context shown around each change when rendering.
const CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Removed(String),
    Added(String),
}

impl DiffLine {
    fn is_change(&self) -> bool {
        !matches!(self, Self::Context(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDiff {
    pub source_label: String,
    pub target_label: String,
    pub lines: Vec<DiffLine>,
}

impl TextDiff {
    pub fn between(
        source_label: impl Into<String>,
        target_label: impl Into<String>,
        before: &str,
        after: &str,
    ) -> Self {
        let old: Vec<&str> = before.lines().collect();
        let new: Vec<&str> = after.lines().collect();

        let mut lines = Vec::with_capacity(old.len().max(new.len()));
        diff_range(&old, &new, &mut lines);

        Self {
            source_label: source_label.into(),
            target_label: target_label.into(),
            lines,
        }
    }

    /// `true` when both texts are identical.
    pub fn is_empty(&self) -> bool {
        !self.lines.iter().any(DiffLine::is_change)
    }

    pub fn added(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| matches!(line, DiffLine::Added(_)))
            .count()
    }

    pub fn removed(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| matches!(line, DiffLine::Removed(_)))
            .count()
    }

    /// Unified-style text: `---`/`+++` headers, then hunks of changed lines
    /// with surrounding context separated by `@@`.
    pub fn render(&self) -> String {
        let mut out = format!("--- {}\n+++ {}\n", self.source_label, self.target_label);
        let changes: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.is_change())
            .map(|(index, _)| index)
            .collect();
        if changes.is_empty() {
            return out;
        }

        let mut visible = vec![false; self.lines.len()];
        for index in changes {
            let start = index.saturating_sub(CONTEXT_LINES);
            let end = (index + CONTEXT_LINES + 1).min(self.lines.len());
            visible[start..end].iter_mut().for_each(|flag| *flag = true);
        }

        let mut in_hunk = false;
        for (line, shown) in self.lines.iter().zip(visible) {
            if !shown {
                in_hunk = false;
                continue;
            }
            if !in_hunk {
                out.push_str("@@\n");
                in_hunk = true;
            }
            let (marker, text) = match line {
                DiffLine::Context(text) => (' ', text),
                DiffLine::Removed(text) => ('-', text),
                DiffLine::Added(text) => ('+', text),
            };
            out.push(marker);
            out.push_str(text);
            out.push('\n');
        }
        out
    }
}

fn context<'a>(lines: &'a [&'a str]) -> impl Iterator<Item = DiffLine> + 'a {
    lines.iter().map(|line| DiffLine::Context((*line).to_string()))
}

fn diff_range(old: &[&str], new: &[&str], out: &mut Vec<DiffLine>) {
    let prefix = old
        .iter()
        .zip(new)
        .take_while(|(left, right)| left == right)
        .count();
    out.extend(context(&old[..prefix]));
    let (old, new) = (&old[prefix..], &new[prefix..]);

    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take_while(|(left, right)| left == right)
        .count();
    let (core_old, core_new) = (&old[..old.len() - suffix], &new[..new.len() - suffix]);

    let split = if core_old.is_empty() || core_new.is_empty() {
        None
    } else {
        middle_split(core_old, core_new)
            .filter(|&(x, y)| (x, y) != (0, 0) && (x, y) != (core_old.len(), core_new.len()))
            .filter(|&(x, y)| x <= core_old.len() && y <= core_new.len())
    };
    match split {
        Some((x, y)) => {
            diff_range(&core_old[..x], &core_new[..y], out);
            diff_range(&core_old[x..], &core_new[y..], out);
        }
        None => {
            out.extend(
                core_old
                    .iter()
                    .map(|line| DiffLine::Removed((*line).to_string())),
            );
            out.extend(core_new.iter().map(|line| DiffLine::Added((*line).to_string())));
        }
    }

    out.extend(context(&old[old.len() - suffix..]));
}

/// Point where a shortest edit path crosses the middle snake.
///
/// Forward and reverse searches advance together until their frontiers
/// overlap; only two frontiers of `n + m` entries are held at a time.
fn middle_split(old: &[&str], new: &[&str]) -> Option<(usize, usize)> {
    let n = old.len() as isize;
    let m = new.len() as isize;
    let max_d = (n + m + 1) / 2;
    let offset = max_d;
    let width = 2 * max_d + 2;
    let mut forward = vec![-1isize; width as usize];
    let mut reverse = vec![-1isize; width as usize];
    forward[(offset + 1) as usize] = 0;
    reverse[(offset + 1) as usize] = 0;
    let delta = n - m;
    let odd = delta % 2 != 0;
    let (mut k1_start, mut k1_end, mut k2_start, mut k2_end) = (0isize, 0isize, 0isize, 0isize);
    let split = |x: isize, y: isize| Some((usize::try_from(x).ok()?, usize::try_from(y).ok()?));

    for d in 0..max_d {
        let mut k1 = -d + k1_start;
        while k1 <= d - k1_end {
            let slot = (offset + k1) as usize;
            let mut x1 = if k1 == -d || (k1 != d && forward[slot - 1] < forward[slot + 1]) {
                forward[slot + 1]
            } else {
                forward[slot - 1] + 1
            };
            let mut y1 = x1 - k1;
            while x1 < n && y1 >= 0 && y1 < m && old[x1 as usize] == new[y1 as usize] {
                x1 += 1;
                y1 += 1;
            }
            forward[slot] = x1;
            if x1 > n {
                k1_end += 2;
            } else if y1 > m {
                k1_start += 2;
            } else if odd {
                let mirror = offset + delta - k1;
                if (0..width).contains(&mirror) && reverse[mirror as usize] != -1 {
                    let x2 = n - reverse[mirror as usize];
                    if x1 >= x2 {
                        return split(x1, y1);
                    }
                }
            }
            k1 += 2;
        }

        let mut k2 = -d + k2_start;
        while k2 <= d - k2_end {
            let slot = (offset + k2) as usize;
            let mut x2 = if k2 == -d || (k2 != d && reverse[slot - 1] < reverse[slot + 1]) {
                reverse[slot + 1]
            } else {
                reverse[slot - 1] + 1
            };
            let mut y2 = x2 - k2;
            while x2 < n
                && y2 >= 0
                && y2 < m
                && old[(n - x2 - 1) as usize] == new[(m - y2 - 1) as usize]
            {
                x2 += 1;
                y2 += 1;
            }
            reverse[slot] = x2;
            if x2 > n {
                k2_end += 2;
            } else if y2 > m {
                k2_start += 2;
            } else if !odd {
                let mirror = offset + delta - k2;
                if (0..width).contains(&mirror) && forward[mirror as usize] != -1 {
                    let x1 = forward[mirror as usize];
                    let y1 = offset + x1 - mirror;
                    if x1 >= n - x2 {
                        return split(x1, y1);
                    }
                }
            }
            k2 += 2;
        }
    }
    None
}
