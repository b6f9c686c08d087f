//! Step planner: maps requested outputs and options to the ordered list of
//! pipeline steps.
//!
//! This ordering is the single source of truth shared between step creation
//! (`service::start_generation`) and worker execution -- no other component
//! may reorder steps.

use coursegen_db::models::{ArtifactType, GenerationOptions, RequestedOutputs, StepKind};

/// A planned step: its kind and the human-readable title persisted on the
/// step row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    pub kind: StepKind,
    pub title: String,
}

impl StepDescriptor {
    fn new(kind: StepKind, title: &str) -> Self {
        Self {
            kind,
            title: title.to_owned(),
        }
    }
}

/// Display title for each generation step, keyed by target artifact.
fn generate_title(artifact_type: ArtifactType) -> &'static str {
    match artifact_type {
        ArtifactType::Document => "Write lesson document",
        ArtifactType::Infographic => "Design infographic",
        ArtifactType::Slides => "Build slide deck",
    }
}

/// Compute the ordered step list for a generation run.
///
/// - Always starts with `interpret`.
/// - Inserts `web_search` next when enabled.
/// - Appends one `generate_*` step per requested output type, in the fixed
///   order document, infographic, slides.
/// - Appends `design_assets` last when image generation is enabled and at
///   least one output was requested.
pub fn plan_steps(outputs: &RequestedOutputs, options: &GenerationOptions) -> Vec<StepDescriptor> {
    let mut steps = vec![StepDescriptor::new(StepKind::Interpret, "Interpret brief")];

    if options.enable_web_search {
        steps.push(StepDescriptor::new(StepKind::WebSearch, "Research topic"));
    }

    for artifact_type in outputs.types() {
        steps.push(StepDescriptor::new(
            StepKind::generate_for(artifact_type),
            generate_title(artifact_type),
        ));
    }

    if options.enable_image_generation && outputs.any() {
        steps.push(StepDescriptor::new(
            StepKind::DesignAssets,
            "Generate visual assets",
        ));
    }

    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(steps: &[StepDescriptor]) -> Vec<StepKind> {
        steps.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn minimal_plan_is_interpret_only() {
        let steps = plan_steps(&RequestedOutputs::default(), &GenerationOptions::default());
        assert_eq!(kinds(&steps), vec![StepKind::Interpret]);
    }

    #[test]
    fn single_output_without_options() {
        let outputs = RequestedOutputs {
            document: true,
            ..Default::default()
        };
        let steps = plan_steps(&outputs, &GenerationOptions::default());
        assert_eq!(
            kinds(&steps),
            vec![StepKind::Interpret, StepKind::GenerateDocument]
        );
    }

    #[test]
    fn web_search_comes_right_after_interpret() {
        let outputs = RequestedOutputs {
            slides: true,
            ..Default::default()
        };
        let options = GenerationOptions {
            enable_web_search: true,
            ..Default::default()
        };
        let steps = plan_steps(&outputs, &options);
        assert_eq!(
            kinds(&steps),
            vec![
                StepKind::Interpret,
                StepKind::WebSearch,
                StepKind::GenerateSlides
            ]
        );
    }

    #[test]
    fn generate_steps_follow_fixed_output_order() {
        let outputs = RequestedOutputs {
            document: true,
            infographic: true,
            slides: true,
        };
        let steps = plan_steps(&outputs, &GenerationOptions::default());
        assert_eq!(
            kinds(&steps),
            vec![
                StepKind::Interpret,
                StepKind::GenerateDocument,
                StepKind::GenerateInfographic,
                StepKind::GenerateSlides
            ]
        );
    }

    #[test]
    fn design_assets_runs_last_when_enabled() {
        let outputs = RequestedOutputs {
            document: true,
            slides: true,
            ..Default::default()
        };
        let options = GenerationOptions {
            enable_web_search: true,
            enable_image_generation: true,
        };
        let steps = plan_steps(&outputs, &options);
        assert_eq!(
            kinds(&steps),
            vec![
                StepKind::Interpret,
                StepKind::WebSearch,
                StepKind::GenerateDocument,
                StepKind::GenerateSlides,
                StepKind::DesignAssets
            ]
        );
    }

    #[test]
    fn design_assets_skipped_without_outputs() {
        let options = GenerationOptions {
            enable_image_generation: true,
            ..Default::default()
        };
        let steps = plan_steps(&RequestedOutputs::default(), &options);
        assert_eq!(kinds(&steps), vec![StepKind::Interpret]);
    }

    #[test]
    fn planning_is_deterministic() {
        let outputs = RequestedOutputs {
            document: true,
            infographic: true,
            slides: true,
        };
        let options = GenerationOptions {
            enable_web_search: true,
            enable_image_generation: true,
        };
        let first = plan_steps(&outputs, &options);
        let second = plan_steps(&outputs, &options);
        assert_eq!(first, second);
    }

    #[test]
    fn titles_are_set_for_every_step() {
        let outputs = RequestedOutputs {
            document: true,
            infographic: true,
            slides: true,
        };
        let options = GenerationOptions {
            enable_web_search: true,
            enable_image_generation: true,
        };
        for step in plan_steps(&outputs, &options) {
            assert!(!step.title.is_empty(), "step {:?} has no title", step.kind);
        }
    }
}
