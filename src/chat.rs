use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::Ollama;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::embedding::parse_host_port;
use crate::types::ExtractedKpi;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat model request failed: {0}")]
    Request(String),
}

/// Which sector profile the extracted KPI mix points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sector {
    HeavyIndustry,
    Services,
    DiversifiedManufacturing,
    General,
    Undetermined,
}

impl Sector {
    pub fn label(&self) -> &'static str {
        match self {
            Sector::HeavyIndustry => "industrial or energy",
            Sector::Services => "services or technology",
            Sector::DiversifiedManufacturing => "diversified manufacturing",
            Sector::General => "general",
            Sector::Undetermined => "undetermined",
        }
    }

    fn outlook(&self) -> &'static str {
        match self {
            Sector::HeavyIndustry => {
                "Industrial and energy players face tightening requirements on greenhouse gas \
                 emissions and energy efficiency; the EU taxonomy and the carbon border \
                 adjustment mechanism will progressively reshape competitive conditions, so \
                 low-carbon innovation and circularity are becoming competitive factors."
            }
            Sector::Services => {
                "Services and technology companies should prepare for greater transparency on \
                 data governance, social impact and indirect environmental footprint; SFDR and \
                 due-diligence requirements keep raising expectations on non-financial \
                 reporting."
            }
            Sector::DiversifiedManufacturing => {
                "Diversified manufacturers sit under combined environmental and social \
                 regulatory pressure, with reporting obligations extending across the supply \
                 chain; eco-design, circularity and workforce development will matter most."
            }
            _ => {
                "The ESG regulatory landscape is consolidating quickly around CSRD and the \
                 green taxonomy; active regulatory monitoring and a flexible compliance \
                 approach are advisable."
            }
        }
    }
}

/// Aggregates used by both the LLM context and the offline narratives.
#[derive(Debug)]
pub struct SliceSummary {
    pub total: usize,
    pub avg_confidence: f64,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    pub topic_counts: Vec<(String, usize)>,
    pub sector: Sector,
}

pub fn summarize_slice(records: &[ExtractedKpi]) -> SliceSummary {
    let total = records.len();
    let avg_confidence = if total == 0 {
        0.0
    } else {
        records.iter().map(|r| r.confidence as f64).sum::<f64>() / total as f64
    };

    let high_confidence = records.iter().filter(|r| r.confidence > 0.7).count();
    let medium_confidence = records
        .iter()
        .filter(|r| r.confidence > 0.4 && r.confidence <= 0.7)
        .count();
    let low_confidence = total - high_confidence - medium_confidence;

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.topic_fr.as_str()).or_insert(0) += 1;
    }
    let mut topic_counts: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(topic, count)| (topic.to_string(), count))
        .collect();
    topic_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    SliceSummary {
        total,
        avg_confidence,
        high_confidence,
        medium_confidence,
        low_confidence,
        topic_counts,
        sector: estimate_sector(records),
    }
}

/// Guess the sector from the environmental/social mix of the topic labels.
pub fn estimate_sector(records: &[ExtractedKpi]) -> Sector {
    if records.is_empty() {
        return Sector::Undetermined;
    }

    let environmental =
        Regex::new(r"(?i)environnement|environment|émis|emission|énergie|energy").unwrap();
    let social = Regex::new(r"(?i)social|diversité|diversity|employé|employee").unwrap();

    let total = records.len() as f64;
    let env_ratio = records
        .iter()
        .filter(|r| environmental.is_match(&r.topic_fr))
        .count() as f64
        / total;
    let social_ratio = records
        .iter()
        .filter(|r| social.is_match(&r.topic_fr))
        .count() as f64
        / total;

    if env_ratio > 0.6 {
        Sector::HeavyIndustry
    } else if social_ratio > 0.5 {
        Sector::Services
    } else if env_ratio > 0.3 && social_ratio > 0.3 {
        Sector::DiversifiedManufacturing
    } else {
        Sector::General
    }
}

/// Company context attached to an insight request.
#[derive(Debug, Default)]
pub struct CompanyInfo {
    pub company: String,
    pub total_kpis: usize,
    pub main_topic: String,
}

/// ESG chatbot backed by a local Ollama server, with deterministic
/// fallbacks so the API keeps answering when the model is down.
pub struct ChatService {
    client: Ollama,
    model: String,
    available: AtomicBool,
}

impl ChatService {
    pub fn new(base_url: &str, model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            available: AtomicBool::new(false),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Re-check connectivity and remember the outcome.
    pub async fn probe(&self) -> bool {
        let ok = self.client.list_local_models().await.is_ok();
        self.available.store(ok, Ordering::Relaxed);
        if ok {
            info!("Ollama reachable, chatbot running in model-backed mode");
        } else {
            warn!("Ollama unreachable, chatbot running in fallback mode");
        }
        ok
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;
        Ok(models.into_iter().map(|m| m.name).collect())
    }

    /// Free-form Q&A over the store context. Connectivity problems come
    /// back as readable strings, never as request failures.
    pub async fn answer(&self, question: &str, context: &str) -> String {
        let system = format!(
            "You are an expert assistant for ESG (Environmental, Social, Governance) \
             analysis. You help users understand KPI data extracted from sustainability \
             reports.\n\nAvailable ESG data context:\n{context}\n\nAnswer clearly and \
             concisely. If the data does not support an answer, say so."
        );

        match self.generate(&system, question).await {
            Ok(text) => text,
            Err(e) => {
                warn!("chat generation failed: {}", e);
                format!("Could not reach the chat model: {e}")
            }
        }
    }

    /// Analyst insight over a (possibly company-filtered) record slice.
    pub async fn insight(
        &self,
        records: &[ExtractedKpi],
        company: &CompanyInfo,
        question: &str,
    ) -> String {
        let summary = summarize_slice(records);
        let context = build_analysis_context(&summary, company, records);

        if self.is_available() {
            let system = "You are a senior ESG analyst with fifteen years of experience. \
                          Write flowing, connected paragraphs rather than bullet lists, \
                          referencing relevant regulation (CSRD, SFDR, EU taxonomy) where \
                          appropriate.";
            let user = format!(
                "ANALYSIS CONTEXT:\n{context}\n\nQUESTION: {question}\n\nProvide a \
                 structured answer that positions the company in its sector, details \
                 strengths and weaknesses with concrete examples, explains strategic and \
                 regulatory implications, and proposes actionable recommendations with \
                 realistic timelines."
            );
            match self.generate(system, &user).await {
                Ok(text) => return format_paragraphs(&text),
                Err(e) => warn!("insight generation failed, using fallback: {}", e),
            }
        }

        offline_insight(&summary, question)
    }

    /// Comparative benchmarking across companies.
    pub async fn benchmark(&self, companies: &BTreeMap<String, Vec<ExtractedKpi>>) -> String {
        if companies.is_empty() {
            return "No data available for a comparative analysis between companies."
                .to_string();
        }

        let scored = score_companies(companies);

        if self.is_available() {
            let mut context = String::from("ESG COMPARATIVE ANALYSIS - COMPANY PROFILES:\n");
            for entry in &scored {
                context.push_str(&format!(
                    "\nCompany: {}\nTracked indicators: {}\nAverage confidence: {:.1}%\nESG topics covered: {}\n",
                    entry.company,
                    entry.kpi_count,
                    entry.avg_confidence * 100.0,
                    entry.coverage
                ));
            }
            let user = format!(
                "COMPARATIVE DATA:\n{context}\nCompare the ESG maturity profiles of these \
                 companies, identify exemplary practices and significant gaps, analyse each \
                 organisation's relative strengths, and propose tailored progression \
                 recommendations. Prefer narrative paragraphs over bullet lists."
            );
            match self
                .generate("You are an expert in ESG benchmarking.", &user)
                .await
            {
                Ok(text) => return format_paragraphs(&text),
                Err(e) => warn!("benchmark generation failed, using fallback: {}", e),
            }
        }

        offline_benchmark(&scored)
    }

    async fn generate(&self, system: &str, user: &str) -> Result<String, ChatError> {
        let request = ChatMessageRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(system.to_string()),
                ChatMessage::user(user.to_string()),
            ],
        );
        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;
        Ok(response.message.content)
    }
}

/// Context summary exposed at `/api/chatbot/context` and prepended to chat
/// prompts.
pub fn build_store_context(records: &[ExtractedKpi]) -> String {
    if records.is_empty() {
        return "No ESG data has been extracted yet. Process PDF reports first.".to_string();
    }

    let summary = summarize_slice(records);
    let mut companies = Vec::new();
    for record in records {
        if !companies.contains(&record.source_file) {
            companies.push(record.source_file.clone());
        }
    }

    let mut lines = vec![
        format!("Total extracted KPIs: {}", summary.total),
        format!("Companies analysed: {}", companies.join(", ")),
        "KPIs per topic:".to_string(),
    ];
    for (topic, count) in summary.topic_counts.iter().take(5) {
        lines.push(format!("  - {topic}: {count} KPIs"));
    }
    lines.push("Sample extracted KPIs:".to_string());
    for record in records.iter().take(3) {
        lines.push(format!(
            "  - {}: {} {}",
            record.kpi_name, record.value, record.unit
        ));
    }
    lines.join("\n")
}

fn build_analysis_context(
    summary: &SliceSummary,
    company: &CompanyInfo,
    records: &[ExtractedKpi],
) -> String {
    let mut parts = Vec::new();

    parts.push(format!(
        "QUANTITATIVE OVERVIEW: {} ESG indicators, average confidence {:.1}%; {} high-confidence \
         (> 70%), {} medium, {} requiring verification.",
        summary.total,
        summary.avg_confidence * 100.0,
        summary.high_confidence,
        summary.medium_confidence,
        summary.low_confidence
    ));

    if !summary.topic_counts.is_empty() {
        let coverage: Vec<String> = summary
            .topic_counts
            .iter()
            .map(|(topic, count)| format!("{topic} ({count})"))
            .collect();
        parts.push(format!("TOPIC COVERAGE: {}.", coverage.join(", ")));
    }

    let mut sorted: Vec<&ExtractedKpi> = records.iter().collect();
    sorted.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    if !sorted.is_empty() {
        let top: Vec<String> = sorted
            .iter()
            .take(3)
            .map(|r| {
                format!(
                    "{} = {} {} (confidence {:.1}%)",
                    r.kpi_name,
                    r.value,
                    r.unit,
                    r.confidence * 100.0
                )
            })
            .collect();
        parts.push(format!("MOST RELIABLE INDICATORS: {}.", top.join("; ")));

        let bottom: Vec<String> = sorted
            .iter()
            .rev()
            .take(3)
            .map(|r| format!("{} (confidence {:.1}%)", r.kpi_name, r.confidence * 100.0))
            .collect();
        parts.push(format!("INDICATORS NEEDING ATTENTION: {}.", bottom.join("; ")));
    }

    if !company.company.is_empty() {
        parts.push(format!(
            "COMPANY CONTEXT: {} with {} indicators, main topic {}.",
            company.company, company.total_kpis, company.main_topic
        ));
    }

    parts.push(format!(
        "SECTOR PERSPECTIVE: the indicator profile suggests a {} sector. {}",
        summary.sector.label(),
        summary.sector.outlook()
    ));

    parts.join("\n")
}

/// Deterministic analyst narrative used when Ollama is unavailable.
pub fn offline_insight(summary: &SliceSummary, question: &str) -> String {
    if summary.total == 0 {
        return no_data_response(question);
    }

    let mut paragraphs = Vec::new();

    paragraphs.push(format!(
        "Across the {} indicators analysed, the overall confidence level averages {:.1}%: \
         {} indicators are highly reliable, {} moderately so, and {} would need additional \
         verification before being used in external reporting.",
        summary.total,
        summary.avg_confidence * 100.0,
        summary.high_confidence,
        summary.medium_confidence,
        summary.low_confidence
    ));

    paragraphs.push(format!(
        "Based on the indicator profile, the organisation most likely operates in a {} \
         sector, which frames how its ESG performance should be read against industry \
         expectations on carbon intensity, workforce diversity and governance.",
        summary.sector.label()
    ));

    if !summary.topic_counts.is_empty() {
        let described: Vec<String> = summary
            .topic_counts
            .iter()
            .take(3)
            .map(|(topic, count)| {
                if *count >= 5 {
                    format!("a robust footprint in {topic} ({count} indicators)")
                } else if *count >= 2 {
                    format!("an operational coverage of {topic} ({count} indicators)")
                } else {
                    format!("an emerging presence in {topic}")
                }
            })
            .collect();
        paragraphs.push(format!(
            "The thematic distribution shows {}.",
            described.join(", ")
        ));
    }

    paragraphs.push(maturity_assessment(summary.avg_confidence).to_string());
    paragraphs.push(strategic_recommendations(question, summary.avg_confidence).to_string());
    paragraphs.push(summary.sector.outlook().to_string());

    paragraphs.join("\n\n")
}

fn maturity_assessment(avg_confidence: f64) -> &'static str {
    if avg_confidence > 0.7 {
        "The ESG maturity level appears advanced, reflecting robust collection systems and \
         an established transparency culture. This positions the organisation well for \
         upcoming CSRD obligations; the next step would be developing impact-oriented \
         indicators and extending ESG criteria across the value chain."
    } else if avg_confidence > 0.5 {
        "ESG maturity sits at an intermediate stage: the collection processes are in place \
         but would benefit from standardisation and automation. Priorities should be \
         consolidating social and environmental data and wiring them into strategic \
         decision-making."
    } else {
        "The ESG programme is still emerging, which calls for structural investment in \
         measurement systems and governance. A prioritised approach targeting the most \
         material topics first would deliver visible progress while laying the groundwork \
         for a deeper transformation."
    }
}

fn strategic_recommendations(question: &str, avg_confidence: f64) -> &'static str {
    let question = question.to_lowercase();

    if ["positioning", "compare", "sector", "benchmark"]
        .iter()
        .any(|w| question.contains(w))
    {
        "To sharpen the sector positioning, set up a systematic benchmark combining the \
         standard sector references with emerging leader practices, and maintain a \
         benchmarking dashboard to track relative standing over time."
    } else if ["performance", "result", "improvement"]
        .iter()
        .any(|w| question.contains(w))
    {
        "Performance optimisation should combine strengthening the reliability of existing \
         data (multi-level validation, spot audits) with a deliberate extension of the \
         reporting scope towards the most material ESG topics."
    } else if ["regulation", "compliance", "csrd", "sfdr"]
        .iter()
        .any(|w| question.contains(w))
    {
        "Given the pace of regulatory change, a full mapping of applicable requirements is \
         in order, starting with CSRD; a detailed gap analysis and a phased transition \
         plan aligned with the regulatory deadlines are the natural next steps."
    } else if avg_confidence > 0.7 {
        "The quality of the available data opens the door to advanced initiatives: \
         science-based targets, ESG-linked remuneration, and green financing to accelerate \
         the transition."
    } else {
        "The immediate priority is consolidating the foundations: standardised collection \
         processes, clear operational ownership, and a progression plan with measurable \
         intermediate objectives."
    }
}

fn no_data_response(question: &str) -> String {
    let question = question.to_lowercase();

    if ["positioning", "compare", "benchmark"]
        .iter()
        .any(|w| question.contains(w))
    {
        "A precise ESG positioning requires company-specific data. Upload a sustainability \
         report together with a KPI reference file so the indicators can be extracted and \
         compared against sector practices."
            .to_string()
    } else if ["performance", "result"].iter().any(|w| question.contains(w)) {
        "Assessing ESG performance relies on extracted quantitative indicators covering the \
         environmental, social and governance dimensions. No extracted data is available \
         yet; process a report first to obtain a personalised analysis."
            .to_string()
    } else {
        "No extracted ESG data is available yet, so any analysis would remain generic. \
         Upload annual or sustainability reports through the extraction endpoint to get a \
         personalised assessment and concrete recommendations."
            .to_string()
    }
}

#[derive(Debug)]
pub struct CompanyScore {
    pub company: String,
    pub kpi_count: usize,
    pub avg_confidence: f64,
    pub coverage: usize,
    pub composite: f64,
}

/// Composite ranking: confidence dominates, topic coverage complements.
pub fn score_companies(companies: &BTreeMap<String, Vec<ExtractedKpi>>) -> Vec<CompanyScore> {
    let mut scored: Vec<CompanyScore> = companies
        .iter()
        .filter(|(_, records)| !records.is_empty())
        .map(|(company, records)| {
            let avg_confidence = records.iter().map(|r| r.confidence as f64).sum::<f64>()
                / records.len() as f64;
            let coverage = records
                .iter()
                .map(|r| r.topic_fr.as_str())
                .collect::<std::collections::BTreeSet<_>>()
                .len();
            CompanyScore {
                company: company.clone(),
                kpi_count: records.len(),
                avg_confidence,
                coverage,
                composite: avg_confidence * 0.6 + (coverage as f64 / 10.0) * 0.4,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.composite
            .partial_cmp(&a.composite)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}

fn offline_benchmark(scored: &[CompanyScore]) -> String {
    if scored.is_empty() {
        return "The available data does not allow a meaningful comparative analysis."
            .to_string();
    }

    let mut paragraphs = vec![
        "Comparative analysis of ESG performance across the selected companies:".to_string(),
    ];

    let leader = &scored[0];
    paragraphs.push(format!(
        "{} stands out with the most mature ESG setup: an average confidence of {:.1}% \
         across {} indicators covering {} distinct ESG topics. This points to systematic \
         collection processes and dedicated governance of sustainability issues.",
        leader.company,
        leader.avg_confidence * 100.0,
        leader.kpi_count,
        leader.coverage
    ));

    if scored.len() > 1 {
        let runner_up = &scored[1];
        paragraphs.push(format!(
            "In comparison, {} shows a solid but distinct profile, with {:.1}% average \
             confidence and {} topics covered. The gap with the leader usually reflects \
             different prioritisation choices or collection methodologies rather than a \
             difference in ambition.",
            runner_up.company,
            runner_up.avg_confidence * 100.0,
            runner_up.coverage
        ));
    }

    if scored.len() > 2 {
        let last = &scored[scored.len() - 1];
        paragraphs.push(format!(
            "The remaining companies show more variable maturity, with confidence levels \
             ranging from {:.1}% to {:.1}%. This heterogeneity highlights real differences \
             in collection processes and resources, and an opportunity for cross-company \
             learning.",
            last.avg_confidence * 100.0,
            scored[1].avg_confidence * 100.0
        ));
    }

    paragraphs.push(
        "To progress collectively, the companies would benefit from sharing measurement \
         methodologies and reporting practices; harmonising collection approaches would \
         make cross-sector comparisons more reliable and strengthen the credibility of \
         their ESG commitments."
            .to_string(),
    );

    paragraphs.join("\n\n")
}

fn format_paragraphs(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
