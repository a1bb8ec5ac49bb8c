use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::types::{ExtractedKpi, ValueHit};

/// Regex-based numeric value extraction for KPI sentences.
///
/// Patterns are compiled once and applied in order; every capture is a
/// `1,234.56`-style number. The surrounding match window decides the
/// million/billion/thousand scale, and the whole sentence decides the unit.
pub struct ValueExtractor {
    patterns: Vec<Regex>,
    unit_rules: Vec<(Regex, &'static str)>,
    scale_million: Regex,
    scale_billion: Regex,
    scale_thousand: Regex,
}

impl ValueExtractor {
    pub fn new() -> Self {
        let number = r"\d{1,3}(?:,\d{3})*(?:\.\d+)?";
        let patterns = vec![
            // Number directly followed by a known unit token.
            Regex::new(&format!(
                r"(?i)({number})\s*(?:tons?|tonnes|t|%|kg|kWh|CO2|CO₂|ppm|ppb|µg/m³|mg/m³|employees|people|€|EUR|USD|\$|m³|MWh|GWh|TJ)"
            ))
            .unwrap(),
            // Plain percentage.
            Regex::new(&format!(r"(?i)({number})%(?:\s|$)")).unwrap(),
            // Copula or relational statement.
            Regex::new(&format!(r"(?i)(?:is|was|are|were|:|=)\s*({number})")).unwrap(),
            // Quantifier phrasing.
            Regex::new(&format!(
                r"(?i)(?:value of|rate of|amount of|total|reduction of|approximately|about)\s*({number})"
            ))
            .unwrap(),
            // Bare number with optional scale and unit words.
            Regex::new(&format!(
                r"(?i)\b({number})\s*(?:million|billion|thousand)?\s*(?:tons?|tonnes|percent|%)?"
            ))
            .unwrap(),
        ];

        let unit_rules = vec![
            (Regex::new(r"(?i)tons?|tonnes|tCO2e|t CO2e").unwrap(), "tons"),
            (Regex::new(r"(?i)kg|kilograms").unwrap(), "kg"),
            (Regex::new(r"(?i)%|percent|percentage").unwrap(), "%"),
            (Regex::new(r"(?i)kWh|kilowatt-hours").unwrap(), "kWh"),
            (Regex::new(r"(?i)MWh|megawatt-hours").unwrap(), "MWh"),
            (Regex::new(r"(?i)GWh|gigawatt-hours").unwrap(), "GWh"),
            (Regex::new(r"(?i)CO2|CO₂|carbon dioxide").unwrap(), "tCO2e"),
            (Regex::new(r"(?i)ppm|parts per million").unwrap(), "ppm"),
            (Regex::new(r"(?i)employees|workers|people").unwrap(), "people"),
            (Regex::new(r"(?i)€|EUR|USD|\$|dollars").unwrap(), "currency"),
            (Regex::new(r"(?i)m³|cubic meters").unwrap(), "m³"),
        ];

        Self {
            patterns,
            unit_rules,
            scale_million: Regex::new(r"(?i)million").unwrap(),
            scale_billion: Regex::new(r"(?i)billion").unwrap(),
            scale_thousand: Regex::new(r"(?i)thousand").unwrap(),
        }
    }

    /// Pull candidate values out of one sentence, deduplicated by
    /// `(value, unit)` and screened by the coherence check.
    pub fn extract(&self, sentence: &str, kpi_name: &str) -> Vec<ValueHit> {
        let mut values = Vec::new();
        let mut seen = HashSet::new();

        for pattern in &self.patterns {
            for captures in pattern.captures_iter(sentence) {
                let window = captures.get(0).map(|m| m.as_str()).unwrap_or("");
                let Some(number) = captures.get(1) else {
                    continue;
                };
                let Ok(parsed) = number.as_str().replace(',', "").parse::<f64>() else {
                    continue;
                };

                let multiplier = if self.scale_million.is_match(window) {
                    1_000_000.0
                } else if self.scale_billion.is_match(window) {
                    1_000_000_000.0
                } else if self.scale_thousand.is_match(window) {
                    1_000.0
                } else {
                    1.0
                };

                let value = parsed * multiplier;
                let unit = self.determine_unit(sentence, kpi_name);
                let value_id = format!("{value}_{unit}");

                if seen.contains(&value_id) || !is_value_coherent(kpi_name, value, &unit) {
                    continue;
                }
                seen.insert(value_id);
                values.push(ValueHit { value, unit });
            }
        }

        values
    }

    /// Unit of a sentence: first matching unit token wins, otherwise the
    /// KPI name itself hints at the expected unit.
    pub fn determine_unit(&self, text: &str, kpi_name: &str) -> String {
        for (pattern, unit) in &self.unit_rules {
            if pattern.is_match(text) {
                return (*unit).to_string();
            }
        }

        let kpi_lower = kpi_name.to_lowercase();
        if ["rate", "ratio", "percentage", "coverage", "reduction"]
            .iter()
            .any(|term| kpi_lower.contains(term))
        {
            "%".to_string()
        } else if ["emission", "ghg", "co2", "carbon"]
            .iter()
            .any(|term| kpi_lower.contains(term))
        {
            "tCO2e".to_string()
        } else if ["energy", "consumption", "electricity"]
            .iter()
            .any(|term| kpi_lower.contains(term))
        {
            "kWh".to_string()
        } else if ["water", "usage"].iter().any(|term| kpi_lower.contains(term)) {
            "m³".to_string()
        } else {
            "unknown".to_string()
        }
    }
}

impl Default for ValueExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Sanity screen for extracted values: volume-type KPIs should not be tiny
/// percentages, and ratio-type KPIs should not be huge raw numbers.
pub fn is_value_coherent(kpi_name: &str, value: f64, unit: &str) -> bool {
    let kpi_lower = kpi_name.to_lowercase();

    let high_value_kpis = [
        "emission",
        "ghg",
        "co2",
        "nox",
        "sox",
        "energy",
        "water",
        "waste",
        "consumption",
    ];
    let percentage_kpis = [
        "rate",
        "ratio",
        "percentage",
        "coverage",
        "compliance",
        "approval",
    ];

    if high_value_kpis.iter().any(|term| kpi_lower.contains(term)) && unit == "%" && value < 1.0 {
        return false;
    }
    if percentage_kpis.iter().any(|term| kpi_lower.contains(term))
        && unit != "%"
        && value > 1000.0
    {
        return false;
    }
    true
}

/// Final screening pass over candidate records: apply the confidence floor,
/// deduplicate on `(kpi_name, value, unit, source_file)`, and keep only the
/// best-scoring occurrence per KPI.
pub fn filter_results(mut results: Vec<ExtractedKpi>, min_confidence: f32) -> Vec<ExtractedKpi> {
    results.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen_ids = HashSet::new();
    let mut best_per_kpi: HashMap<String, ()> = HashMap::new();
    let mut filtered = Vec::new();

    for result in results {
        if result.confidence < min_confidence {
            continue;
        }
        if !seen_ids.insert(result.dedup_key()) {
            continue;
        }
        if best_per_kpi.contains_key(&result.kpi_name) {
            continue;
        }
        best_per_kpi.insert(result.kpi_name.clone(), ());
        filtered.push(result);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kpi: &str, value: f64, confidence: f32, source: &str) -> ExtractedKpi {
        ExtractedKpi {
            kpi_name: kpi.to_string(),
            value,
            unit: "tons".to_string(),
            source_file: source.to_string(),
            topic: "Environment".to_string(),
            topic_fr: "Environnement".to_string(),
            score: "A".to_string(),
            confidence,
            extraction_date: "2025-01-01 00:00:00".to_string(),
        }
    }

    #[test]
    fn extracts_number_with_unit_token() {
        let extractor = ValueExtractor::new();
        let hits = extractor.extract("Direct emissions reached 120,500 tons", "GHG Emissions");

        assert!(hits.contains(&ValueHit {
            value: 120_500.0,
            unit: "tons".to_string()
        }));
    }

    #[test]
    fn extracts_percentage() {
        let extractor = ValueExtractor::new();
        let hits = extractor.extract("female representation stands at 45.2%", "Gender Diversity");

        assert!(hits.iter().any(|h| h.value == 45.2 && h.unit == "%"));
    }

    #[test]
    fn million_scale_multiplies_value() {
        let extractor = ValueExtractor::new();
        let hits = extractor.extract("emissions were 3.5 million tons", "GHG Emissions");

        // The bare-number pattern sees the scale word, the copula pattern
        // does not: both readings are kept.
        assert!(hits.iter().any(|h| h.value == 3_500_000.0));
        assert!(hits.iter().any(|h| h.value == 3.5));
    }

    #[test]
    fn thousand_scale_multiplies_value() {
        let extractor = ValueExtractor::new();
        let hits = extractor.extract("roughly 50 thousand tonnes", "Waste Generated");

        assert!(hits.iter().any(|h| h.value == 50_000.0));
    }

    #[test]
    fn employee_counts_get_people_unit() {
        let extractor = ValueExtractor::new();
        let hits = extractor.extract("approximately 1,200 employees", "Total Workforce");

        assert!(hits.iter().any(|h| h.value == 1200.0 && h.unit == "people"));
    }

    #[test]
    fn duplicate_values_within_sentence_collapse() {
        let extractor = ValueExtractor::new();
        let hits = extractor.extract("the rate is 85% and remains 85%", "Training Coverage Rate");

        let count = hits.iter().filter(|h| h.value == 85.0).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn unit_inferred_from_kpi_name_when_text_has_none() {
        let extractor = ValueExtractor::new();
        assert_eq!(
            extractor.determine_unit("improved from last year", "Recycling Rate"),
            "%"
        );
        assert_eq!(
            extractor.determine_unit("rose in line with output", "Carbon Intensity"),
            "tCO2e"
        );
        assert_eq!(
            extractor.determine_unit("grew with the new plant", "Electricity Demand"),
            "kWh"
        );
        assert_eq!(
            extractor.determine_unit("stayed flat", "Water Withdrawal"),
            "m³"
        );
        assert_eq!(extractor.determine_unit("stayed flat", "Board Size"), "unknown");
    }

    #[test]
    fn unit_token_in_text_beats_kpi_inference() {
        let extractor = ValueExtractor::new();
        assert_eq!(
            extractor.determine_unit("consumed 30 GWh of power", "Water Withdrawal"),
            "GWh"
        );
    }

    #[test]
    fn tiny_percentage_rejected_for_volume_kpis() {
        assert!(!is_value_coherent("GHG Emissions", 0.5, "%"));
        assert!(is_value_coherent("GHG Emissions", 12.0, "%"));
    }

    #[test]
    fn huge_raw_value_rejected_for_ratio_kpis() {
        assert!(!is_value_coherent("Compliance Rate", 5000.0, "tons"));
        assert!(is_value_coherent("Compliance Rate", 98.0, "%"));
        // Percent-unit ratio values of any size pass this check.
        assert!(is_value_coherent("Compliance Rate", 5000.0, "%"));
    }

    #[test]
    fn filter_keeps_best_occurrence_per_kpi() {
        let results = vec![
            record("GHG Emissions", 120.0, 0.6, "acme.pdf"),
            record("GHG Emissions", 99.0, 0.9, "acme.pdf"),
            record("Water Usage", 400.0, 0.5, "acme.pdf"),
        ];
        let filtered = filter_results(results, 0.3);

        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].kpi_name, "GHG Emissions");
        assert_eq!(filtered[0].value, 99.0);
    }

    #[test]
    fn filter_applies_confidence_floor() {
        let results = vec![
            record("GHG Emissions", 120.0, 0.2, "acme.pdf"),
            record("Water Usage", 400.0, 0.5, "acme.pdf"),
        ];
        let filtered = filter_results(results, 0.3);

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].kpi_name, "Water Usage");
    }

    #[test]
    fn filter_drops_exact_duplicates() {
        let results = vec![
            record("GHG Emissions", 120.0, 0.8, "acme.pdf"),
            record("GHG Emissions", 120.0, 0.8, "acme.pdf"),
        ];
        let filtered = filter_results(results, 0.3);
        assert_eq!(filtered.len(), 1);
    }
}
