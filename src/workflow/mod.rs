//! Static research workflow catalog.
//!
//! The research workflow is classified in two levels: acts, each holding an
//! ordered list of categories. Every category owns a checklist of guidance
//! tools; progress for a category is measured as coverage of that checklist.
//! Catalog order is the recommended working order.

/// A top-level stage of the research workflow.
#[derive(Debug)]
pub struct ResearchAct {
    /// Stable identifier stored in the database.
    pub name: &'static str,
    /// Display title.
    pub title: &'static str,
    /// Categories in recommended order.
    pub categories: &'static [ResearchCategory],
}

/// A unit of measurable progress within an act.
#[derive(Debug)]
pub struct ResearchCategory {
    /// Stable identifier stored in the database.
    pub name: &'static str,
    /// Display title.
    pub title: &'static str,
    /// Tools that make up the category checklist.
    pub tools: &'static [GuidanceTool],
}

/// A guidance tool attached to a category.
#[derive(Debug)]
pub struct GuidanceTool {
    pub name: &'static str,
    pub description: &'static str,
    /// Ordered prompts returned to the caller.
    pub steps: &'static [&'static str],
}

/// One (act, category) pair with its global position in catalog order.
#[derive(Debug, Clone, Copy)]
pub struct CategoryRef {
    pub act: &'static ResearchAct,
    pub category: &'static ResearchCategory,
    pub position: usize,
}

impl CategoryRef {
    /// Names of the tools on this category's checklist.
    pub fn checklist(&self) -> Vec<&'static str> {
        self.category.tools.iter().map(|t| t.name).collect()
    }
}

/// The research workflow, in recommended order.
pub static CATALOG: &[ResearchAct] = &[
    ResearchAct {
        name: "conceptualization",
        title: "Conceptualization",
        categories: &[
            ResearchCategory {
                name: "question_formulation",
                title: "Research question formulation",
                tools: &[
                    GuidanceTool {
                        name: "define_research_question",
                        description: "Shape a topic into a focused, answerable research question.",
                        steps: &[
                            "State the phenomenon or problem in one sentence.",
                            "Name the population, setting and time frame.",
                            "Rewrite the question so that evidence could answer it.",
                        ],
                    },
                    GuidanceTool {
                        name: "refine_hypothesis",
                        description: "Turn a research question into testable hypotheses.",
                        steps: &[
                            "List the expected relationship between the key variables.",
                            "Write the null and alternative hypotheses.",
                            "Note what observation would falsify each hypothesis.",
                        ],
                    },
                ],
            },
            ResearchCategory {
                name: "literature_review",
                title: "Literature review",
                tools: &[
                    GuidanceTool {
                        name: "plan_literature_search",
                        description: "Plan databases, keywords and inclusion criteria for a literature search.",
                        steps: &[
                            "Choose the databases and archives to cover.",
                            "Build keyword groups and boolean search strings.",
                            "Fix inclusion and exclusion criteria before screening.",
                        ],
                    },
                    GuidanceTool {
                        name: "synthesize_literature",
                        description: "Organize reviewed sources into themes and gaps.",
                        steps: &[
                            "Group sources by theme or method.",
                            "Record agreements and contradictions between groups.",
                            "Name the gap your study addresses.",
                        ],
                    },
                ],
            },
        ],
    },
    ResearchAct {
        name: "design",
        title: "Design and planning",
        categories: &[
            ResearchCategory {
                name: "methodology",
                title: "Methodology",
                tools: &[
                    GuidanceTool {
                        name: "select_methodology",
                        description: "Compare candidate methodologies against the research question.",
                        steps: &[
                            "List qualitative, quantitative and mixed options.",
                            "Score each option against the question and constraints.",
                            "Justify the chosen approach in two sentences.",
                        ],
                    },
                    GuidanceTool {
                        name: "assess_validity",
                        description: "Identify threats to validity and reliability in the design.",
                        steps: &[
                            "List threats to internal and external validity.",
                            "Pair each threat with a mitigation.",
                            "Decide how reliability will be measured.",
                        ],
                    },
                ],
            },
            ResearchCategory {
                name: "data_planning",
                title: "Data planning",
                tools: &[
                    GuidanceTool {
                        name: "plan_data_collection",
                        description: "Plan sampling, sources and schedule for data collection.",
                        steps: &[
                            "Define the sampling frame and target size.",
                            "List data sources and access requirements.",
                            "Draft a collection timeline with checkpoints.",
                        ],
                    },
                    GuidanceTool {
                        name: "design_instruments",
                        description: "Draft surveys, interview guides or measurement protocols.",
                        steps: &[
                            "Map every instrument item to a research variable.",
                            "Pilot the instrument with a small group.",
                            "Revise ambiguous items after the pilot.",
                        ],
                    },
                ],
            },
        ],
    },
    ResearchAct {
        name: "execution",
        title: "Execution",
        categories: &[
            ResearchCategory {
                name: "data_collection",
                title: "Data collection",
                tools: &[
                    GuidanceTool {
                        name: "log_data_collection",
                        description: "Record a data collection batch and its conditions.",
                        steps: &[
                            "Record when, where and by whom the batch was collected.",
                            "Note deviations from the collection plan.",
                            "Store raw data before any cleaning.",
                        ],
                    },
                    GuidanceTool {
                        name: "track_sampling",
                        description: "Check sample coverage against the sampling plan.",
                        steps: &[
                            "Compare collected counts with planned quotas.",
                            "Flag under-represented strata.",
                            "Decide whether to extend collection.",
                        ],
                    },
                ],
            },
            ResearchCategory {
                name: "analysis",
                title: "Analysis",
                tools: &[
                    GuidanceTool {
                        name: "plan_analysis",
                        description: "Plan the analysis steps for collected data.",
                        steps: &[
                            "List cleaning and transformation steps.",
                            "Match each hypothesis with an analysis technique.",
                            "Pre-register decision thresholds.",
                        ],
                    },
                    GuidanceTool {
                        name: "interpret_results",
                        description: "Relate analysis output back to the hypotheses.",
                        steps: &[
                            "Summarize each result in plain language.",
                            "State which hypotheses are supported.",
                            "Record limitations that affect interpretation.",
                        ],
                    },
                ],
            },
        ],
    },
    ResearchAct {
        name: "dissemination",
        title: "Dissemination",
        categories: &[
            ResearchCategory {
                name: "writing",
                title: "Writing",
                tools: &[
                    GuidanceTool {
                        name: "outline_manuscript",
                        description: "Build a section outline for the manuscript.",
                        steps: &[
                            "Pick the target venue and its section structure.",
                            "Write one key message per section.",
                            "Assign figures and tables to sections.",
                        ],
                    },
                    GuidanceTool {
                        name: "draft_section",
                        description: "Draft one manuscript section from the outline.",
                        steps: &[
                            "Start from the section's key message.",
                            "Support each paragraph with results or citations.",
                            "End with a transition to the next section.",
                        ],
                    },
                ],
            },
            ResearchCategory {
                name: "review",
                title: "Review and submission",
                tools: &[
                    GuidanceTool {
                        name: "prepare_peer_review",
                        description: "Prepare an internal review round before submission.",
                        steps: &[
                            "Choose reviewers outside the core team.",
                            "Give reviewers a checklist of questions.",
                            "Track each comment to a resolution.",
                        ],
                    },
                    GuidanceTool {
                        name: "check_submission_readiness",
                        description: "Verify the manuscript against submission requirements.",
                        steps: &[
                            "Check length, format and reference style.",
                            "Confirm data availability and ethics statements.",
                            "Collect author approvals.",
                        ],
                    },
                ],
            },
        ],
    },
];

/// All categories in catalog order.
pub fn categories() -> impl Iterator<Item = CategoryRef> {
    CATALOG
        .iter()
        .flat_map(|act| act.categories.iter().map(move |category| (act, category)))
        .enumerate()
        .map(|(position, (act, category))| CategoryRef {
            act,
            category,
            position,
        })
}

/// Look up a category by its act and category names.
pub fn find_category(act: &str, category: &str) -> Option<CategoryRef> {
    categories().find(|c| c.act.name == act && c.category.name == category)
}

/// Find the category whose checklist contains `tool_name`.
pub fn classify(tool_name: &str) -> Option<(CategoryRef, &'static GuidanceTool)> {
    categories().find_map(|c| {
        c.category
            .tools
            .iter()
            .find(|t| t.name == tool_name)
            .map(|t| (c, t))
    })
}

/// Look up an act by name.
pub fn find_act(name: &str) -> Option<&'static ResearchAct> {
    CATALOG.iter().find(|a| a.name == name)
}

/// Index of an act in catalog order.
pub fn act_position(name: &str) -> Option<usize> {
    CATALOG.iter().position(|a| a.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_shape() {
        assert_eq!(CATALOG.len(), 4);
        assert_eq!(categories().count(), 8);
        assert!(categories().all(|c| c.category.tools.len() == 2));
    }

    #[test]
    fn test_tool_names_are_unique() {
        let mut seen = HashSet::new();
        for c in categories() {
            for tool in c.category.tools {
                assert!(seen.insert(tool.name), "duplicate tool {}", tool.name);
            }
        }
    }

    #[test]
    fn test_classify_and_positions() {
        let (c, tool) = classify("plan_analysis").unwrap();
        assert_eq!(c.act.name, "execution");
        assert_eq!(c.category.name, "analysis");
        assert_eq!(tool.steps.len(), 3);
        assert_eq!(c.position, 5);
        assert!(classify("initialize_project").is_none());

        assert_eq!(act_position("conceptualization"), Some(0));
        assert_eq!(act_position("dissemination"), Some(3));
        assert_eq!(
            find_category("design", "methodology").unwrap().checklist(),
            vec!["select_methodology", "assess_validity"]
        );
    }
}
