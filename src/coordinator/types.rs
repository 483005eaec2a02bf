//! 行程规划的请求、结果与执行计划

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::{AgentConfig, AgentRequest, TripSegment};
use crate::core::PlanError;

/// 满 18 岁按成人计
pub const ADULT_AGE: u8 = 18;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyMember {
    pub name: String,
    pub age: u8,
}

impl FamilyMember {
    pub fn is_adult(&self) -> bool {
        self.age >= ADULT_AGE
    }
}

/// 家庭档案（规划上下文）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyProfile {
    pub family_name: String,
    pub members: Vec<FamilyMember>,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub home_address: Option<String>,
}

impl FamilyProfile {
    pub fn adults(&self) -> usize {
        self.members.iter().filter(|m| m.is_adult()).count()
    }

    pub fn children(&self) -> usize {
        self.members.len() - self.adults()
    }
}

/// 一次行程规划请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRequest {
    pub destination: String,
    /// 缺省时用家庭住址
    #[serde(default)]
    pub origin: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub family: FamilyProfile,
    /// 覆盖家庭档案中的预算
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub preferences: Vec<String>,
}

impl TripRequest {
    pub fn effective_budget(&self) -> Option<f64> {
        self.budget.or(self.family.budget)
    }

    pub fn effective_origin(&self) -> Option<&str> {
        self.origin
            .as_deref()
            .or(self.family.home_address.as_deref())
            .map(str::trim)
            .filter(|o| !o.is_empty())
    }

    pub fn nights(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    /// 请求校验；失败即终止规划
    pub fn validate(&self, max_trip_nights: i64) -> Result<(), PlanError> {
        if self.destination.trim().is_empty() {
            return Err(PlanError::Validation("destination must not be empty".into()));
        }
        if self.end_date <= self.start_date {
            return Err(PlanError::Validation(format!(
                "end date {} must be after start date {}",
                self.end_date, self.start_date
            )));
        }
        if self.nights() > max_trip_nights {
            return Err(PlanError::Validation(format!(
                "trip of {} nights exceeds the {} night limit",
                self.nights(),
                max_trip_nights
            )));
        }
        if self.family.members.is_empty() {
            return Err(PlanError::Validation("family must have at least one member".into()));
        }
        for budget in [self.budget, self.family.budget].into_iter().flatten() {
            if !budget.is_finite() || budget < 0.0 {
                return Err(PlanError::Validation(format!("invalid budget: {budget}")));
            }
        }
        Ok(())
    }

    /// 规范化后的缓存键：大小写与首尾空白不影响命中
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.destination.trim().to_lowercase(),
            self.effective_origin().unwrap_or("").to_lowercase(),
            self.start_date,
            self.end_date,
            self.family.adults(),
            self.family.children(),
            self.effective_budget().map(|b| format!("{b:.2}")).unwrap_or_default()
        )
    }

    pub fn to_agent_request(&self, request_id: &str) -> AgentRequest {
        AgentRequest {
            request_id: request_id.to_string(),
            destination: self.destination.trim().to_string(),
            origin: self.effective_origin().map(str::to_string),
            start_date: self.start_date,
            end_date: self.end_date,
            adults: self.family.adults(),
            children: self.family.children(),
            budget: self.effective_budget(),
            context: Vec::new(),
        }
    }
}

/// 费用明细；discounts 为正数，从合计中扣除
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub transport: f64,
    pub accommodation: f64,
    pub meals: f64,
    pub activities: f64,
    pub insurance: f64,
    pub discounts: f64,
    pub total: f64,
    pub per_person: f64,
    pub currency: String,
}

/// 合成后的行程
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripPlan {
    pub id: String,
    /// 产出本结果的请求；缓存命中时为命中的那次请求
    pub request_id: String,
    pub destination: String,
    pub origin: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub travelers: usize,
    /// 按开始日期排序
    pub segments: Vec<TripSegment>,
    pub advisories: Vec<String>,
    pub warnings: Vec<String>,
    pub cost: CostBreakdown,
    pub confidence: f64,
    pub agents_consulted: Vec<String>,
    pub processing_time_ms: u64,
    pub cached: bool,
    pub created_at: DateTime<Utc>,
}

/// 三阶段执行计划：阶段内并行，阶段间串行
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub phase1: Vec<String>,
    pub phase2: Vec<String>,
    pub phase3: Vec<String>,
}

impl ExecutionPlan {
    /// 按 priority 分组，超出 1..=3 的截断到边界；组内保持输入顺序
    pub fn from_configs(configs: &[(String, AgentConfig)]) -> Self {
        let mut plan = Self::default();
        for (id, config) in configs {
            let phase = match config.priority.clamp(1, 3) {
                1 => &mut plan.phase1,
                2 => &mut plan.phase2,
                _ => &mut plan.phase3,
            };
            phase.push(id.clone());
        }
        plan
    }

    pub fn phases(&self) -> [&[String]; 3] {
        [self.phase1.as_slice(), self.phase2.as_slice(), self.phase3.as_slice()]
    }

    pub fn agent_count(&self) -> usize {
        self.phases().iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.agent_count() == 0
    }
}

/// 费用估算用的固定费率
#[derive(Debug, Clone, PartialEq)]
pub struct CostRates {
    /// 每人每天餐饮
    pub meal_per_day: f64,
    /// 每人每天活动
    pub activity_per_day: f64,
    /// 保险占小计的比例
    pub insurance_rate: f64,
    pub currency: String,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            meal_per_day: 45.0,
            activity_per_day: 30.0,
            insurance_rate: 0.05,
            currency: "USD".to_string(),
        }
    }
}

/// 协调器运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub plan_cache_ttl: Duration,
    pub plan_cache_capacity: usize,
    pub cache_cleanup_interval: Duration,
    pub health_check_interval: Duration,
    pub max_parallel_agents: usize,
    pub metrics_retention: usize,
    pub max_trip_nights: i64,
    pub rates: CostRates,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            plan_cache_ttl: Duration::from_secs(15 * 60),
            plan_cache_capacity: 100,
            cache_cleanup_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(60),
            max_parallel_agents: 4,
            metrics_retention: 1000,
            max_trip_nights: 60,
            rates: CostRates::default(),
        }
    }
}
