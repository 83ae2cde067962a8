//! Categorisation of the change between baseline and follow-up.
//!
//! Pure functions over two [`Measurements`]. Changes are follow-up minus baseline.

use crate::records::Measurements;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GlycemicResponse {
    SuperResponder,
    Responder,
    PartialResponder,
    NonResponder,
}

impl GlycemicResponse {
    /// Classifies an HbA1c change in percentage points.
    pub fn from_change(change: f64) -> Self {
        if change <= -1.5 {
            GlycemicResponse::SuperResponder
        } else if change <= -1.0 {
            GlycemicResponse::Responder
        } else if change <= -0.5 {
            GlycemicResponse::PartialResponder
        } else {
            GlycemicResponse::NonResponder
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GlycemicResponse::SuperResponder => "Super-responder",
            GlycemicResponse::Responder => "Responder",
            GlycemicResponse::PartialResponder => "Partial responder",
            GlycemicResponse::NonResponder => "Non-responder",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WeightOutcome {
    Gain,
    ModerateGain,
    Neutral,
    Loss,
}

impl WeightOutcome {
    /// Classifies a weight change in kg. Anything from -3 kg up to (not including) +1 kg is
    /// neutral; only a loss beyond 3 kg is reported as a loss.
    pub fn from_change(change: f64) -> Self {
        if change >= 3.0 {
            WeightOutcome::Gain
        } else if change >= 1.0 {
            WeightOutcome::ModerateGain
        } else if change >= -3.0 {
            WeightOutcome::Neutral
        } else {
            WeightOutcome::Loss
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WeightOutcome::Gain => "Gain \u{2265}3 kg",
            WeightOutcome::ModerateGain => "Gain 1-2.9 kg",
            WeightOutcome::Neutral => "Neutral",
            WeightOutcome::Loss => "Loss >3 kg",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RenalOutcome {
    Improved,
    Stable,
    MinorDecline,
    MajorDecline,
}

impl RenalOutcome {
    /// Classifies an eGFR change. Missing or zero values are reported as stable.
    pub fn from_values(baseline: Option<f64>, follow_up: Option<f64>) -> Self {
        let (Some(before), Some(after)) = (baseline, follow_up) else {
            return RenalOutcome::Stable;
        };
        if before <= 0.0 || after <= 0.0 {
            return RenalOutcome::Stable;
        }

        let change = after - before;
        if change > 0.0 {
            RenalOutcome::Improved
        } else if change == 0.0 {
            RenalOutcome::Stable
        } else if change / before * 100.0 > -10.0 {
            RenalOutcome::MinorDecline
        } else {
            RenalOutcome::MajorDecline
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RenalOutcome::Improved => "Improved eGFR",
            RenalOutcome::Stable => "Stable eGFR",
            RenalOutcome::MinorDecline => "Decline <10%",
            RenalOutcome::MajorDecline => "Decline \u{2265}10%",
        }
    }
}

/// Follow-up blood pressure against the <140/90 mmHg target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BloodPressureOutcome {
    pub systolic_controlled: bool,
    pub diastolic_controlled: bool,
}

impl BloodPressureOutcome {
    pub fn from_follow_up(systolic: f64, diastolic: f64) -> Self {
        Self {
            systolic_controlled: systolic < 140.0,
            diastolic_controlled: diastolic < 90.0,
        }
    }

    pub fn controlled(&self) -> bool {
        self.systolic_controlled && self.diastolic_controlled
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Outcomes {
    pub glycemic: GlycemicResponse,
    pub hba1c_change: f64,
    pub weight: WeightOutcome,
    pub weight_change: f64,
    pub renal: RenalOutcome,
    pub egfr_change: Option<f64>,
    pub blood_pressure: BloodPressureOutcome,
}

pub fn calculate(baseline: &Measurements, follow_up: &Measurements) -> Outcomes {
    let hba1c_change = follow_up.hba1c - baseline.hba1c;
    let weight_change = follow_up.weight - baseline.weight;
    let egfr_change = baseline
        .egfr
        .zip(follow_up.egfr)
        .map(|(before, after)| after - before);

    Outcomes {
        glycemic: GlycemicResponse::from_change(hba1c_change),
        hba1c_change,
        weight: WeightOutcome::from_change(weight_change),
        weight_change,
        renal: RenalOutcome::from_values(baseline.egfr, follow_up.egfr),
        egfr_change,
        blood_pressure: BloodPressureOutcome::from_follow_up(
            follow_up.blood_pressure_systolic,
            follow_up.blood_pressure_diastolic,
        ),
    }
}

impl Outcomes {
    /// One line per outcome, in report order. Stable renal function is not reported.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = vec![
            format!(
                "Glycemic control: {} (HbA1c change: {}%)",
                self.glycemic.label(),
                signed(self.hba1c_change, 2)
            ),
            format!(
                "Weight change: {} ({} kg)",
                self.weight.label(),
                signed(self.weight_change, 1)
            ),
        ];

        if self.renal != RenalOutcome::Stable {
            let change = self.egfr_change.unwrap_or(0.0);
            lines.push(format!(
                "Renal function: {} ({} mL/min/1.73m2)",
                self.renal.label(),
                signed(change, 1)
            ));
        }

        lines.push(if self.blood_pressure.controlled() {
            "Blood pressure: Controlled (<140/90)".to_string()
        } else {
            "Blood pressure: Not controlled".to_string()
        });
        lines
    }
}

/// Formats with an explicit `+` for positive values.
pub(crate) fn signed(value: f64, precision: usize) -> String {
    if value > 0.0 {
        format!("+{value:.precision$}")
    } else {
        format!("{value:.precision$}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurements(hba1c: f64, weight: f64, egfr: Option<f64>, bp: (f64, f64)) -> Measurements {
        Measurements {
            hba1c,
            fpg: 150.0,
            ppg: None,
            weight,
            blood_pressure_systolic: bp.0,
            blood_pressure_diastolic: bp.1,
            heart_rate: None,
            serum_creatinine: None,
            egfr,
            urinalysis: String::new(),
        }
    }

    #[test]
    fn glycemic_boundaries() {
        assert_eq!(GlycemicResponse::from_change(-1.5), GlycemicResponse::SuperResponder);
        assert_eq!(GlycemicResponse::from_change(-1.2), GlycemicResponse::Responder);
        assert_eq!(GlycemicResponse::from_change(-1.0), GlycemicResponse::Responder);
        assert_eq!(GlycemicResponse::from_change(-0.5), GlycemicResponse::PartialResponder);
        assert_eq!(GlycemicResponse::from_change(-0.49), GlycemicResponse::NonResponder);
        assert_eq!(GlycemicResponse::from_change(0.3), GlycemicResponse::NonResponder);
    }

    #[test]
    fn weight_boundaries() {
        assert_eq!(WeightOutcome::from_change(3.0), WeightOutcome::Gain);
        assert_eq!(WeightOutcome::from_change(1.0), WeightOutcome::ModerateGain);
        assert_eq!(WeightOutcome::from_change(0.99), WeightOutcome::Neutral);
        assert_eq!(WeightOutcome::from_change(-2.0), WeightOutcome::Neutral);
        assert_eq!(WeightOutcome::from_change(-3.0), WeightOutcome::Neutral);
        assert_eq!(WeightOutcome::from_change(-3.1), WeightOutcome::Loss);
    }

    #[test]
    fn renal_outcomes() {
        assert_eq!(RenalOutcome::from_values(Some(60.0), Some(65.0)), RenalOutcome::Improved);
        assert_eq!(RenalOutcome::from_values(Some(60.0), Some(60.0)), RenalOutcome::Stable);
        assert_eq!(RenalOutcome::from_values(Some(80.0), Some(75.0)), RenalOutcome::MinorDecline);
        assert_eq!(RenalOutcome::from_values(Some(80.0), Some(72.0)), RenalOutcome::MajorDecline);
        assert_eq!(RenalOutcome::from_values(None, Some(72.0)), RenalOutcome::Stable);
    }

    #[test]
    fn blood_pressure_target_is_strict() {
        assert!(BloodPressureOutcome::from_follow_up(139.0, 89.0).controlled());
        assert!(!BloodPressureOutcome::from_follow_up(140.0, 80.0).controlled());
        assert!(!BloodPressureOutcome::from_follow_up(130.0, 90.0).controlled());
    }

    #[test]
    fn summary_lists_outcomes_in_order() {
        let outcomes = calculate(
            &measurements(8.6, 84.0, Some(80.0), (142.0, 88.0)),
            &measurements(7.0, 80.5, Some(70.0), (132.0, 82.0)),
        );

        assert_eq!(outcomes.glycemic, GlycemicResponse::SuperResponder);
        assert_eq!(outcomes.weight, WeightOutcome::Loss);
        assert_eq!(outcomes.renal, RenalOutcome::MajorDecline);

        let summary = outcomes.summary();
        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0], "Glycemic control: Super-responder (HbA1c change: -1.60%)");
        assert_eq!(summary[1], "Weight change: Loss >3 kg (-3.5 kg)");
        assert!(summary[2].starts_with("Renal function: Decline \u{2265}10%"));
        assert_eq!(summary[3], "Blood pressure: Controlled (<140/90)");
    }

    #[test]
    fn summary_omits_stable_renal_function() {
        let outcomes = calculate(
            &measurements(8.0, 80.0, None, (150.0, 95.0)),
            &measurements(8.2, 81.5, None, (150.0, 95.0)),
        );
        let summary = outcomes.summary();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary[2], "Blood pressure: Not controlled");
    }
}
