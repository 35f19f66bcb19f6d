use ndarray::ArrayView1;
use crate::error::{Result, SurvNetError};

/// Harrell's concordance index - how often do higher risk scores = shorter
/// survival?
///
/// a pair (i, j) is usable when i had an observed event and j outlived it
/// (either kind of outcome); ties in predicted risk count one half. when no
/// pair is usable the index is undefined and we return the neutral 0.5
/// instead of dividing by zero.
pub fn concordance_index(
    risk_scores: ArrayView1<f64>,
    times: ArrayView1<f64>,
    events: &[bool],
) -> Result<f64> {
    let n = risk_scores.len();
    if n != times.len() || n != events.len() {
        return Err(SurvNetError::invalid_dimensions(
            "risk scores, times, and events must have same length"
        ));
    }

    let mut concordant = 0.0;
    let mut discordant = 0.0;
    let mut tied_risk = 0.0;

    for i in 0..n {
        if !events[i] {
            continue;
        }

        for j in 0..n {
            if i == j {
                continue;
            }

            // j is comparable to i if j survived longer (event or censored)
            if times[j] > times[i] || (!events[j] && times[j] >= times[i]) {
                if risk_scores[i] > risk_scores[j] {
                    concordant += 1.0;
                } else if risk_scores[i] < risk_scores[j] {
                    discordant += 1.0;
                } else {
                    tied_risk += 1.0;
                }
            }
        }
    }

    let total_pairs = concordant + discordant + tied_risk;
    if total_pairs == 0.0 {
        return Ok(0.5);
    }

    Ok((concordant + 0.5 * tied_risk) / total_pairs)
}
