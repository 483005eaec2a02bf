//! 内置的确定性 Agent
//!
//! 没有真实后端时用来驱动整条编排链路：价格由目的地与日期推导，同样的输入总得到同样的输出。
//! 接入真实服务时实现 TravelAgent 并替换注册即可。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, TimeDelta};

use super::{AgentCapability, AgentConfig, AgentOutput, AgentRequest, SegmentKind, TravelAgent, TripSegment};

/// 由目的地推出的价格系数，落在 0.8 ~ 1.2
fn price_factor(destination: &str) -> f64 {
    let sum: u32 = destination
        .trim()
        .to_lowercase()
        .bytes()
        .map(u32::from)
        .sum();
    0.8 + (sum % 41) as f64 / 100.0
}

fn cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

async fn simulate(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

fn segment(kind: SegmentKind, agent: &str, provider: &str, title: String, request: &AgentRequest) -> TripSegment {
    TripSegment {
        kind,
        source_agent: agent.to_string(),
        provider: provider.to_string(),
        title,
        start_date: request.start_date,
        end_date: request.end_date,
        price: 0.0,
        details: None,
    }
}

/// 往返航班；没有出发地时跳过
pub struct FlightAgent {
    latency: Duration,
}

impl FlightAgent {
    pub const ID: &'static str = "flights";

    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(120),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for FlightAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TravelAgent for FlightAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Round-trip family flights"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &[AgentCapability::Search]
    }

    async fn invoke(&self, capability: AgentCapability, request: &AgentRequest) -> Result<AgentOutput, String> {
        if capability != AgentCapability::Search {
            return Err(format!("unsupported capability: {capability}"));
        }
        simulate(self.latency).await;

        let Some(origin) = request.origin.as_deref().filter(|o| !o.trim().is_empty()) else {
            return Ok(AgentOutput {
                segments: vec![],
                advisories: vec!["No origin given; flights were not searched".to_string()],
                confidence: 0.3,
            });
        };

        let adult_fare = 220.0 * price_factor(&request.destination);
        let leg_price = cents(request.adults as f64 * adult_fare + request.children as f64 * adult_fare * 0.75);

        let mut outbound = segment(
            SegmentKind::Flight,
            Self::ID,
            "SkyFamily Air",
            format!("{} → {}", origin.trim(), request.destination.trim()),
            request,
        );
        outbound.end_date = request.start_date;
        outbound.price = leg_price;

        let mut inbound = segment(
            SegmentKind::Flight,
            Self::ID,
            "SkyFamily Air",
            format!("{} → {}", request.destination.trim(), origin.trim()),
            request,
        );
        inbound.start_date = request.end_date;
        inbound.price = leg_price;

        Ok(AgentOutput {
            segments: vec![outbound, inbound],
            advisories: vec![],
            confidence: 0.85,
        })
    }
}

/// 酒店：Search 给标准家庭房，Optimize 给经济型方案
pub struct HotelAgent {
    latency: Duration,
}

impl HotelAgent {
    pub const ID: &'static str = "hotels";

    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(90),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for HotelAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TravelAgent for HotelAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Family rooms sized to the party"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &[AgentCapability::Search, AgentCapability::Optimize]
    }

    async fn invoke(&self, capability: AgentCapability, request: &AgentRequest) -> Result<AgentOutput, String> {
        let (provider, rate, confidence) = match capability {
            AgentCapability::Search => ("Harbor View Family Suites", 150.0, 0.9),
            AgentCapability::Optimize => ("City Budget Inn", 105.0, 0.75),
            other => return Err(format!("unsupported capability: {other}")),
        };
        simulate(self.latency).await;

        // 每间房最多 4 人
        let rooms = request.travelers().div_ceil(4).max(1);
        let nightly = rate * price_factor(&request.destination) * rooms as f64;

        let mut stay = segment(
            SegmentKind::Hotel,
            Self::ID,
            provider,
            format!("{} room(s), {} night(s)", rooms, request.nights()),
            request,
        );
        stay.price = cents(nightly * request.nights() as f64);
        stay.details = Some(format!("{:.2} per night", nightly));

        Ok(AgentOutput {
            segments: vec![stay],
            advisories: vec![],
            confidence,
        })
    }
}

/// 按出发月份给出的季节性天气
pub struct WeatherAgent {
    latency: Duration,
}

impl WeatherAgent {
    pub const ID: &'static str = "weather";
    pub const STORM_SEASON: &'static str = "storm season";

    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(40),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for WeatherAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TravelAgent for WeatherAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &[AgentCapability::Forecast]
    }

    async fn invoke(&self, capability: AgentCapability, request: &AgentRequest) -> Result<AgentOutput, String> {
        if capability != AgentCapability::Forecast {
            return Err(format!("unsupported capability: {capability}"));
        }
        simulate(self.latency).await;

        let conditions = match request.start_date.month() {
            12 | 1 | 2 => "cold",
            6..=8 => "warm",
            9..=11 => Self::STORM_SEASON,
            _ => "mild",
        };
        let mut advisories = Vec::new();
        if conditions == Self::STORM_SEASON {
            advisories.push("Storm season: check cancellation policies before booking".to_string());
        }

        let mut forecast = segment(
            SegmentKind::Weather,
            Self::ID,
            "Seasonal outlook",
            format!("Forecast for {}: {}", request.destination.trim(), conditions),
            request,
        );
        forecast.details = Some(conditions.to_string());

        Ok(AgentOutput {
            segments: vec![forecast],
            advisories,
            confidence: 0.6,
        })
    }
}

/// 短途邮轮；读取前序阶段的天气判断风险
pub struct CruiseAgent {
    latency: Duration,
}

impl CruiseAgent {
    pub const ID: &'static str = "cruises";
    const CRUISE_NIGHTS: i64 = 3;

    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(150),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for CruiseAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TravelAgent for CruiseAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Short family cruises departing near the destination"
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &[AgentCapability::Search]
    }

    async fn invoke(&self, capability: AgentCapability, request: &AgentRequest) -> Result<AgentOutput, String> {
        if capability != AgentCapability::Search {
            return Err(format!("unsupported capability: {capability}"));
        }
        simulate(self.latency).await;

        if request.nights() < Self::CRUISE_NIGHTS + 1 {
            return Ok(AgentOutput {
                segments: vec![],
                advisories: vec!["Trip too short for a cruise".to_string()],
                confidence: 0.5,
            });
        }

        let stormy = request.context.iter().any(|s| {
            s.kind == SegmentKind::Weather && s.details.as_deref() == Some(WeatherAgent::STORM_SEASON)
        });

        let fare = 320.0 * price_factor(&request.destination);
        let mut cruise = segment(
            SegmentKind::Cruise,
            Self::ID,
            "Blue Wake Cruises",
            format!("{}-night coastal cruise", Self::CRUISE_NIGHTS),
            request,
        );
        cruise.start_date = request.start_date + TimeDelta::days(1);
        cruise.end_date = cruise.start_date + TimeDelta::days(Self::CRUISE_NIGHTS);
        cruise.price = cents(request.adults as f64 * fare + request.children as f64 * fare * 0.5);

        let mut advisories = Vec::new();
        if stormy {
            advisories.push("Cruise departs during storm season; itinerary may change".to_string());
        }

        Ok(AgentOutput {
            segments: vec![cruise],
            advisories,
            confidence: if stormy { 0.5 } else { 0.8 },
        })
    }
}

/// 根据前序阶段的航班与酒店片段生成折扣（负价格）
pub struct DealsAgent {
    latency: Duration,
}

impl DealsAgent {
    pub const ID: &'static str = "deals";

    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(60),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for DealsAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TravelAgent for DealsAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &[AgentCapability::FindDeals]
    }

    async fn invoke(&self, capability: AgentCapability, request: &AgentRequest) -> Result<AgentOutput, String> {
        if capability != AgentCapability::FindDeals {
            return Err(format!("unsupported capability: {capability}"));
        }
        simulate(self.latency).await;

        let mut segments = Vec::new();

        for hotel in request.context.iter().filter(|s| s.kind == SegmentKind::Hotel) {
            if (hotel.end_date - hotel.start_date).num_days() >= 5 {
                let mut deal = segment(
                    SegmentKind::Deal,
                    Self::ID,
                    &hotel.provider,
                    "Long stay: 10% off".to_string(),
                    request,
                );
                deal.price = -cents(hotel.price * 0.10);
                segments.push(deal);
            }
        }

        let flight_total: f64 = request
            .context
            .iter()
            .filter(|s| s.kind == SegmentKind::Flight)
            .map(|s| s.price)
            .sum();
        if request.children > 0 && flight_total > 0.0 {
            let mut deal = segment(
                SegmentKind::Deal,
                Self::ID,
                "SkyFamily Air",
                "Kids fly: 5% off airfare".to_string(),
                request,
            );
            deal.price = -cents(flight_total * 0.05);
            segments.push(deal);
        }

        let advisories = if segments.is_empty() {
            vec!["No deals found for this itinerary".to_string()]
        } else {
            vec![]
        };

        Ok(AgentOutput {
            segments,
            advisories,
            confidence: 0.7,
        })
    }
}

/// 内置 Agent 及其默认配置
pub fn default_agents() -> Vec<(Arc<dyn TravelAgent>, AgentConfig)> {
    vec![
        (
            Arc::new(FlightAgent::new()) as Arc<dyn TravelAgent>,
            AgentConfig::new(AgentCapability::Search, 1).with_cache_ttl(Duration::from_secs(300)),
        ),
        (
            Arc::new(HotelAgent::new()),
            AgentConfig::new(AgentCapability::Search, 1).with_cache_ttl(Duration::from_secs(300)),
        ),
        (
            Arc::new(WeatherAgent::new()),
            AgentConfig::new(AgentCapability::Forecast, 1)
                .with_timeout(Duration::from_secs(5))
                .with_cache_ttl(Duration::from_secs(1800)),
        ),
        (
            Arc::new(CruiseAgent::new()),
            AgentConfig::new(AgentCapability::Search, 2).with_timeout(Duration::from_secs(15)),
        ),
        (
            Arc::new(DealsAgent::new()),
            AgentConfig::new(AgentCapability::FindDeals, 3).with_retry(2, Duration::from_millis(100)),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn request(month: u32, nights: u64, children: usize) -> AgentRequest {
        let start = NaiveDate::from_ymd_opt(2026, month, 3).unwrap();
        AgentRequest {
            request_id: "r".into(),
            destination: "Lisbon".into(),
            origin: Some("Boston".into()),
            start_date: start,
            end_date: start + TimeDelta::days(nights as i64),
            adults: 2,
            children,
            budget: None,
            context: vec![],
        }
    }

    #[test]
    fn test_price_factor_range() {
        for dest in ["Lisbon", "lisbon ", "Tokyo", "", "Reykjavík"] {
            let f = price_factor(dest);
            assert!((0.8..=1.2).contains(&f), "{dest}: {f}");
        }
        assert_eq!(price_factor("Lisbon"), price_factor("  LISBON "));
    }

    #[tokio::test]
    async fn test_flights_need_origin() {
        let agent = FlightAgent::with_latency(Duration::ZERO);
        let mut req = request(4, 4, 1);
        let out = agent.invoke(AgentCapability::Search, &req).await.unwrap();
        assert_eq!(out.segments.len(), 2);
        assert_eq!(out.segments[0].start_date, req.start_date);
        assert_eq!(out.segments[1].start_date, req.end_date);

        req.origin = None;
        let out = agent.invoke(AgentCapability::Search, &req).await.unwrap();
        assert!(out.segments.is_empty());
        assert_eq!(out.advisories.len(), 1);
    }

    #[tokio::test]
    async fn test_hotel_rooms_and_optimize() {
        let agent = HotelAgent::with_latency(Duration::ZERO);
        let mut req = request(4, 4, 3);
        let search = agent.invoke(AgentCapability::Search, &req).await.unwrap();
        assert!(search.segments[0].title.starts_with("2 room(s)"));

        req.children = 1;
        let search = agent.invoke(AgentCapability::Search, &req).await.unwrap();
        let optimized = agent.invoke(AgentCapability::Optimize, &req).await.unwrap();
        assert!(optimized.segments[0].price < search.segments[0].price);

        assert!(agent.invoke(AgentCapability::Forecast, &req).await.is_err());
    }

    #[tokio::test]
    async fn test_cruise_reads_storm_forecast() {
        let weather = WeatherAgent::with_latency(Duration::ZERO);
        let cruise = CruiseAgent::with_latency(Duration::ZERO);

        let mut req = request(10, 6, 0);
        let forecast = weather.invoke(AgentCapability::Forecast, &req).await.unwrap();
        assert_eq!(forecast.segments[0].details.as_deref(), Some(WeatherAgent::STORM_SEASON));
        req.context = forecast.segments;

        let out = cruise.invoke(AgentCapability::Search, &req).await.unwrap();
        assert_eq!(out.segments.len(), 1);
        assert_eq!(out.confidence, 0.5);
        assert_eq!(out.advisories.len(), 1);

        let short = request(4, 2, 0);
        let out = cruise.invoke(AgentCapability::Search, &short).await.unwrap();
        assert!(out.segments.is_empty());
    }

    #[tokio::test]
    async fn test_deals_from_context() {
        let deals = DealsAgent::with_latency(Duration::ZERO);
        let mut req = request(4, 6, 2);
        req.context = [
            FlightAgent::with_latency(Duration::ZERO)
                .invoke(AgentCapability::Search, &req)
                .await
                .unwrap()
                .segments,
            HotelAgent::with_latency(Duration::ZERO)
                .invoke(AgentCapability::Search, &req)
                .await
                .unwrap()
                .segments,
        ]
        .concat();

        let out = deals.invoke(AgentCapability::FindDeals, &req).await.unwrap();
        assert_eq!(out.segments.len(), 2);
        assert!(out.segments.iter().all(|s| s.kind == SegmentKind::Deal && s.price < 0.0));

        req.context.clear();
        let out = deals.invoke(AgentCapability::FindDeals, &req).await.unwrap();
        assert!(out.segments.is_empty());
        assert_eq!(out.advisories.len(), 1);
    }

    #[test]
    fn test_default_agents_capabilities_match() {
        let agents = default_agents();
        assert_eq!(agents.len(), 5);
        for (agent, config) in &agents {
            assert!(agent.supports(config.capability), "{}", agent.id());
        }
    }
}
