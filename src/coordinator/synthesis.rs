//! 行程合成：把各 Agent 的响应合并为片段、提示与告警，并估算费用

use crate::agents::{AgentResponse, SegmentKind, TripSegment};

use super::{CostBreakdown, CostRates};

/// 合成结果（尚未含费用）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Synthesis {
    pub segments: Vec<TripSegment>,
    pub advisories: Vec<String>,
    pub warnings: Vec<String>,
    pub confidence: f64,
    pub agents_consulted: Vec<String>,
}

pub(crate) fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 成功响应的片段与提示被展开合并；失败的 Agent 变成 "<agent>: <error>" 告警
pub fn synthesize(responses: &[AgentResponse]) -> Synthesis {
    let mut out = Synthesis::default();
    let mut confidence_sum = 0.0;
    let mut succeeded = 0usize;

    for response in responses {
        out.agents_consulted.push(response.agent_id.clone());
        match (&response.data, response.success) {
            (Some(data), true) => {
                succeeded += 1;
                confidence_sum += response.confidence;
                out.segments.extend(data.segments.iter().cloned());
                for advisory in &data.advisories {
                    if !out.advisories.contains(advisory) {
                        out.advisories.push(advisory.clone());
                    }
                }
            }
            _ => {
                let error = response.error.as_deref().unwrap_or("unknown error");
                out.warnings.push(format!("{}: {}", response.agent_id, error));
            }
        }
    }

    if out.segments.is_empty() {
        out.warnings.push("No agent returned any itinerary segments".to_string());
    }

    // 稳定排序：同一天内保持阶段顺序
    out.segments.sort_by_key(|s| s.start_date);
    out.confidence = if succeeded == 0 {
        0.0
    } else {
        round_cents(confidence_sum / succeeded as f64)
    };
    out
}

/// 交通与住宿取自片段价格；餐饮与活动按每人每天固定费率（天数含首尾）；保险按小计比例
pub fn compute_cost(segments: &[TripSegment], travelers: usize, nights: i64, rates: &CostRates) -> CostBreakdown {
    let sum_of = |kinds: &[SegmentKind]| -> f64 {
        segments
            .iter()
            .filter(|s| kinds.contains(&s.kind))
            .map(|s| s.price)
            .sum()
    };

    let days = (nights.max(0) + 1) as f64;
    let people = travelers as f64;

    let transport = sum_of(&[SegmentKind::Flight, SegmentKind::Cruise]);
    let accommodation = sum_of(&[SegmentKind::Hotel]);
    let meals = rates.meal_per_day * people * days;
    let activities = rates.activity_per_day * people * days + sum_of(&[SegmentKind::Activity]);
    let discounts = -sum_of(&[SegmentKind::Deal]);

    let subtotal = transport + accommodation + meals + activities;
    let insurance = subtotal * rates.insurance_rate;
    let total = (subtotal + insurance - discounts).max(0.0);

    CostBreakdown {
        transport: round_cents(transport),
        accommodation: round_cents(accommodation),
        meals: round_cents(meals),
        activities: round_cents(activities),
        insurance: round_cents(insurance),
        discounts: round_cents(discounts.max(0.0)),
        total: round_cents(total),
        per_person: if travelers == 0 { 0.0 } else { round_cents(total / people) },
        currency: rates.currency.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentOutput;
    use chrono::NaiveDate;

    fn seg(kind: SegmentKind, day: u32, price: f64) -> TripSegment {
        let date = NaiveDate::from_ymd_opt(2026, 7, day).unwrap();
        TripSegment {
            kind,
            source_agent: "test".into(),
            provider: "p".into(),
            title: format!("{kind:?}"),
            start_date: date,
            end_date: date,
            price,
            details: None,
        }
    }

    #[test]
    fn test_synthesize_merges_and_warns() {
        let ok = AgentResponse::succeeded(
            "hotels",
            AgentOutput {
                segments: vec![seg(SegmentKind::Hotel, 3, 500.0), seg(SegmentKind::Flight, 1, 300.0)],
                advisories: vec!["Bring sunscreen".into()],
                confidence: 0.8,
            },
            10,
            0,
        );
        let failed = AgentResponse::failed("cruises", "Operation timed out after 1s", 1000, 2);

        let out = synthesize(&[ok, failed]);
        assert_eq!(out.segments.len(), 2);
        assert_eq!(out.segments[0].kind, SegmentKind::Flight);
        assert_eq!(out.warnings, vec!["cruises: Operation timed out after 1s".to_string()]);
        assert_eq!(out.advisories, vec!["Bring sunscreen".to_string()]);
        assert_eq!(out.confidence, 0.8);
        assert_eq!(out.agents_consulted, vec!["hotels", "cruises"]);
    }

    #[test]
    fn test_synthesize_all_failed() {
        let out = synthesize(&[AgentResponse::failed("flights", "down", 0, 0)]);
        assert_eq!(out.warnings.len(), 2);
        assert_eq!(out.confidence, 0.0);
    }

    #[test]
    fn test_compute_cost() {
        let segments = vec![
            seg(SegmentKind::Flight, 1, 400.0),
            seg(SegmentKind::Flight, 5, 400.0),
            seg(SegmentKind::Hotel, 1, 600.0),
            seg(SegmentKind::Weather, 1, 0.0),
            seg(SegmentKind::Deal, 1, -60.0),
        ];
        let rates = CostRates::default();
        // 2 人 4 晚 → 5 天
        let cost = compute_cost(&segments, 2, 4, &rates);
        assert_eq!(cost.transport, 800.0);
        assert_eq!(cost.accommodation, 600.0);
        assert_eq!(cost.meals, 450.0);
        assert_eq!(cost.activities, 300.0);
        assert_eq!(cost.insurance, 107.5);
        assert_eq!(cost.discounts, 60.0);
        assert_eq!(cost.total, 2197.5);
        assert_eq!(cost.per_person, 1098.75);
        assert_eq!(cost.currency, "USD");
    }
}
