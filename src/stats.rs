use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::types::ExtractedKpi;

#[derive(Debug, Serialize)]
pub struct Statistics {
    pub total_kpis: usize,
    pub companies: usize,
    pub unique_topics: usize,
    pub last_extraction: String,
    pub processed_files: Vec<FileKpiCount>,
}

#[derive(Debug, Serialize)]
pub struct FileKpiCount {
    pub filename: String,
    pub kpi_count: usize,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub metrics: DashboardMetrics,
    pub benchmark: Vec<CompanyBenchmark>,
    pub chart_data: ChartData,
}

#[derive(Debug, Serialize)]
pub struct DashboardMetrics {
    pub total_kpis: usize,
    pub companies: usize,
    pub unique_topics: usize,
    pub last_extraction: String,
}

#[derive(Debug, Serialize)]
pub struct CompanyBenchmark {
    pub company: String,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ChartData {
    pub confidence_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct CompanyView {
    pub company: String,
    pub metrics: CompanyMetrics,
    pub top_kpis: Vec<TopKpi>,
    pub chart_data: CompanyChartData,
}

#[derive(Debug, Serialize)]
pub struct CompanyMetrics {
    pub kpi_count: usize,
    pub avg_confidence: f64,
    pub topic_coverage: f64,
}

#[derive(Debug, Serialize)]
pub struct TopKpi {
    pub kpi_name: String,
    pub value: f64,
    pub unit: String,
    pub confidence: f32,
    pub topic_fr: String,
}

#[derive(Debug, Serialize)]
pub struct CompanyChartData {
    pub value_vs_confidence: Vec<ValuePoint>,
}

#[derive(Debug, Serialize)]
pub struct ValuePoint {
    pub value: f64,
    pub confidence: f32,
}

#[derive(Debug, Serialize)]
pub struct Comparison {
    pub radar_data: RadarData,
    pub similarity_data: Option<SimilarityData>,
}

#[derive(Debug, Serialize)]
pub struct RadarData {
    pub categories: Vec<String>,
    pub companies: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Serialize)]
pub struct SimilarityData {
    pub companies: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
}

/// Which record field comparison categories come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareBy {
    Topic,
    TopicFr,
}

impl CompareBy {
    pub fn parse(value: &str) -> Self {
        match value {
            "topic" => CompareBy::Topic,
            _ => CompareBy::TopicFr,
        }
    }

    fn field<'a>(&self, record: &'a ExtractedKpi) -> &'a str {
        match self {
            CompareBy::Topic => &record.topic,
            CompareBy::TopicFr => &record.topic_fr,
        }
    }
}

pub fn statistics(records: &[ExtractedKpi]) -> Statistics {
    let mut files: Vec<FileKpiCount> = Vec::new();
    for record in records {
        match files.iter_mut().find(|f| f.filename == record.source_file) {
            Some(entry) => entry.kpi_count += 1,
            None => files.push(FileKpiCount {
                filename: record.source_file.clone(),
                kpi_count: 1,
            }),
        }
    }

    Statistics {
        total_kpis: records.len(),
        companies: files.len(),
        unique_topics: distinct(records, |r| &r.topic),
        last_extraction: last_extraction(records),
        processed_files: files,
    }
}

pub fn dashboard(records: &[ExtractedKpi], min_confidence: f32) -> Dashboard {
    let display: Vec<&ExtractedKpi> = records
        .iter()
        .filter(|r| r.confidence >= min_confidence)
        .collect();

    let mut by_company: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for record in &display {
        by_company
            .entry(record.source_file.as_str())
            .or_default()
            .push(record.value);
    }

    let benchmark = by_company
        .into_iter()
        .map(|(company, values)| summarize(company, &values))
        .collect();

    let mut confidence_distribution: BTreeMap<String, usize> = BTreeMap::new();
    for record in &display {
        let bucket = format!("{:.2}", record.confidence);
        *confidence_distribution.entry(bucket).or_insert(0) += 1;
    }

    Dashboard {
        metrics: DashboardMetrics {
            total_kpis: display.len(),
            companies: distinct_ref(&display, |r| &r.source_file),
            unique_topics: distinct_ref(&display, |r| &r.topic_fr),
            last_extraction: last_extraction_ref(&display),
        },
        benchmark,
        chart_data: ChartData {
            confidence_distribution,
        },
    }
}

pub fn company_view(
    records: &[ExtractedKpi],
    company: &str,
    min_confidence: f32,
) -> Option<CompanyView> {
    let display: Vec<&ExtractedKpi> = records
        .iter()
        .filter(|r| r.confidence >= min_confidence)
        .collect();
    let company_records: Vec<&ExtractedKpi> = display
        .iter()
        .copied()
        .filter(|r| r.source_file == company)
        .collect();

    if company_records.is_empty() {
        return None;
    }

    let avg_confidence = company_records
        .iter()
        .map(|r| r.confidence as f64)
        .sum::<f64>()
        / company_records.len() as f64;

    let all_topics = distinct_ref(&display, |r| &r.topic_fr).max(1);
    let topic_coverage = distinct_ref(&company_records, |r| &r.topic_fr) as f64 / all_topics as f64;

    let mut sorted = company_records.clone();
    sorted.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top_kpis = sorted
        .iter()
        .take(10)
        .map(|r| TopKpi {
            kpi_name: r.kpi_name.clone(),
            value: r.value,
            unit: r.unit.clone(),
            confidence: r.confidence,
            topic_fr: r.topic_fr.clone(),
        })
        .collect();

    let value_vs_confidence = company_records
        .iter()
        .map(|r| ValuePoint {
            value: r.value,
            confidence: r.confidence,
        })
        .collect();

    Some(CompanyView {
        company: company.to_string(),
        metrics: CompanyMetrics {
            kpi_count: company_records.len(),
            avg_confidence,
            topic_coverage,
        },
        top_kpis,
        chart_data: CompanyChartData {
            value_vs_confidence,
        },
    })
}

pub fn comparison(
    records: &[ExtractedKpi],
    companies: &[String],
    compare_by: CompareBy,
    min_confidence: f32,
) -> Option<Comparison> {
    let selected: Vec<&ExtractedKpi> = records
        .iter()
        .filter(|r| r.confidence >= min_confidence && companies.contains(&r.source_file))
        .collect();

    if selected.is_empty() {
        return None;
    }

    let categories: Vec<String> = selected
        .iter()
        .map(|r| compare_by.field(r).to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    // Mean value per (company, category); absent cells stay at zero.
    let mut company_vectors: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for company in companies {
        let rows: Vec<&&ExtractedKpi> = selected
            .iter()
            .filter(|r| &r.source_file == company)
            .collect();
        if rows.is_empty() {
            continue;
        }
        let vector = categories
            .iter()
            .map(|category| {
                let values: Vec<f64> = rows
                    .iter()
                    .filter(|r| compare_by.field(r) == category)
                    .map(|r| r.value)
                    .collect();
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f64>() / values.len() as f64
                }
            })
            .collect();
        company_vectors.insert(company.clone(), vector);
    }

    let similarity_data = if company_vectors.len() >= 2 {
        let names: Vec<String> = company_vectors.keys().cloned().collect();
        let matrix = names
            .iter()
            .map(|a| {
                names
                    .iter()
                    .map(|b| cosine_f64(&company_vectors[a], &company_vectors[b]))
                    .collect()
            })
            .collect();
        Some(SimilarityData {
            companies: names,
            matrix,
        })
    } else {
        None
    };

    Some(Comparison {
        radar_data: RadarData {
            categories,
            companies: company_vectors,
        },
        similarity_data,
    })
}

fn summarize(company: &str, values: &[f64]) -> CompanyBenchmark {
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = if count % 2 == 1 {
        sorted[count / 2]
    } else {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    };

    // Sample standard deviation; a single observation reports zero.
    let std = if count > 1 {
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    CompanyBenchmark {
        company: company.to_string(),
        mean,
        median,
        min: sorted[0],
        max: sorted[count - 1],
        std,
        count,
    }
}

fn cosine_f64(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn distinct<F>(records: &[ExtractedKpi], field: F) -> usize
where
    F: Fn(&ExtractedKpi) -> &String,
{
    records
        .iter()
        .map(|r| field(r).as_str())
        .collect::<BTreeSet<_>>()
        .len()
}

fn distinct_ref<F>(records: &[&ExtractedKpi], field: F) -> usize
where
    F: Fn(&ExtractedKpi) -> &String,
{
    records
        .iter()
        .map(|r| field(r).as_str())
        .collect::<BTreeSet<_>>()
        .len()
}

fn last_extraction(records: &[ExtractedKpi]) -> String {
    records
        .iter()
        .map(|r| r.extraction_date.as_str())
        .max()
        .unwrap_or("Unknown")
        .to_string()
}

fn last_extraction_ref(records: &[&ExtractedKpi]) -> String {
    records
        .iter()
        .map(|r| r.extraction_date.as_str())
        .max()
        .unwrap_or("Unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        kpi: &str,
        value: f64,
        source: &str,
        topic_fr: &str,
        confidence: f32,
        date: &str,
    ) -> ExtractedKpi {
        ExtractedKpi {
            kpi_name: kpi.to_string(),
            value,
            unit: "tons".to_string(),
            source_file: source.to_string(),
            topic: "Environment".to_string(),
            topic_fr: topic_fr.to_string(),
            score: "A".to_string(),
            confidence,
            extraction_date: date.to_string(),
        }
    }

    fn sample() -> Vec<ExtractedKpi> {
        vec![
            record("GHG Emissions", 100.0, "acme.pdf", "Environnement", 0.9, "2025-01-02 10:00:00"),
            record("Water Usage", 200.0, "acme.pdf", "Environnement", 0.6, "2025-01-02 10:00:00"),
            record("Gender Diversity", 45.0, "acme.pdf", "Social", 0.8, "2025-01-02 10:00:00"),
            record("GHG Emissions", 300.0, "globex.pdf", "Environnement", 0.5, "2025-01-03 09:00:00"),
            record("Board Independence", 60.0, "globex.pdf", "Gouvernance", 0.2, "2025-01-03 09:00:00"),
        ]
    }

    #[test]
    fn statistics_counts_files_and_topics() {
        let stats = statistics(&sample());

        assert_eq!(stats.total_kpis, 5);
        assert_eq!(stats.companies, 2);
        assert_eq!(stats.unique_topics, 1); // all share the English topic
        assert_eq!(stats.last_extraction, "2025-01-03 09:00:00");
        assert_eq!(stats.processed_files.len(), 2);
        assert_eq!(stats.processed_files[0].filename, "acme.pdf");
        assert_eq!(stats.processed_files[0].kpi_count, 3);
    }

    #[test]
    fn statistics_on_empty_store() {
        let stats = statistics(&[]);
        assert_eq!(stats.total_kpis, 0);
        assert_eq!(stats.last_extraction, "Unknown");
        assert!(stats.processed_files.is_empty());
    }

    #[test]
    fn dashboard_applies_confidence_filter() {
        let dashboard = dashboard(&sample(), 0.5);

        // The 0.2-confidence record is excluded everywhere.
        assert_eq!(dashboard.metrics.total_kpis, 4);
        assert_eq!(dashboard.metrics.companies, 2);
        assert_eq!(dashboard.metrics.unique_topics, 2);

        let acme = dashboard
            .benchmark
            .iter()
            .find(|b| b.company == "acme.pdf")
            .unwrap();
        assert_eq!(acme.count, 3);
        assert!((acme.mean - 115.0).abs() < 1e-9);
        assert!((acme.median - 100.0).abs() < 1e-9);
        assert_eq!(acme.min, 45.0);
        assert_eq!(acme.max, 200.0);

        let globex = dashboard
            .benchmark
            .iter()
            .find(|b| b.company == "globex.pdf")
            .unwrap();
        assert_eq!(globex.count, 1);
        assert_eq!(globex.std, 0.0);
    }

    #[test]
    fn dashboard_confidence_histogram_buckets() {
        let dashboard = dashboard(&sample(), 0.0);
        assert_eq!(dashboard.chart_data.confidence_distribution["0.90"], 1);
        assert_eq!(dashboard.chart_data.confidence_distribution["0.20"], 1);
    }

    #[test]
    fn sample_std_matches_hand_computation() {
        let summary = summarize("x", &[2.0, 4.0, 6.0]);
        // mean 4, variance ((4+0+4)/2)=4, std 2
        assert!((summary.std - 2.0).abs() < 1e-9);
        assert!((summary.median - 4.0).abs() < 1e-9);
    }

    #[test]
    fn median_of_even_count_averages_middles() {
        let summary = summarize("x", &[1.0, 2.0, 3.0, 10.0]);
        assert!((summary.median - 2.5).abs() < 1e-9);
    }

    #[test]
    fn company_view_covers_metrics_and_top_kpis() {
        let view = company_view(&sample(), "acme.pdf", 0.5).unwrap();

        assert_eq!(view.metrics.kpi_count, 3);
        assert!((view.metrics.avg_confidence - (0.9 + 0.6 + 0.8) as f64 / 3.0).abs() < 1e-6);
        // acme covers 2 of the 2 topics visible at this confidence level.
        assert!((view.metrics.topic_coverage - 1.0).abs() < 1e-9);
        assert_eq!(view.top_kpis[0].kpi_name, "GHG Emissions");
        assert_eq!(view.chart_data.value_vs_confidence.len(), 3);
    }

    #[test]
    fn company_view_missing_company_is_none() {
        assert!(company_view(&sample(), "initech.pdf", 0.3).is_none());
    }

    #[test]
    fn comparison_builds_radar_and_similarity() {
        let companies = vec!["acme.pdf".to_string(), "globex.pdf".to_string()];
        let comparison = comparison(&sample(), &companies, CompareBy::TopicFr, 0.0).unwrap();

        assert_eq!(
            comparison.radar_data.categories,
            vec!["Environnement", "Gouvernance", "Social"]
        );
        let acme = &comparison.radar_data.companies["acme.pdf"];
        assert!((acme[0] - 150.0).abs() < 1e-9); // mean of 100 and 200
        assert_eq!(acme[1], 0.0); // no governance records

        let similarity = comparison.similarity_data.unwrap();
        assert_eq!(similarity.companies.len(), 2);
        assert!((similarity.matrix[0][0] - 1.0).abs() < 1e-9);
        assert_eq!(similarity.matrix[0][1], similarity.matrix[1][0]);
    }

    #[test]
    fn comparison_without_matching_companies_is_none() {
        let companies = vec!["initech.pdf".to_string()];
        assert!(comparison(&sample(), &companies, CompareBy::TopicFr, 0.0).is_none());
    }

    #[test]
    fn comparison_single_company_has_no_similarity() {
        let companies = vec!["acme.pdf".to_string()];
        let comparison = comparison(&sample(), &companies, CompareBy::TopicFr, 0.0).unwrap();
        assert!(comparison.similarity_data.is_none());
    }
}
