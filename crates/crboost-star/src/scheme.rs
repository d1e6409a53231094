use crate::document::{BlockContent, StarBlock, StarDocument, StarTable};

/// The three float variables every scheme carries. Reset values equal the
/// initial values: the pipeliner restores them on `--reset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchemeFloats {
    pub do_at_most: f64,
    pub maxtime_hr: f64,
    pub wait_sec: f64,
}

impl Default for SchemeFloats {
    fn default() -> Self {
        Self {
            do_at_most: 999_999.0,
            maxtime_hr: 48.0,
            wait_sec: 180.0,
        }
    }
}

fn float(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Synthesize the top-level scheme description for an ordered job selection.
///
/// The result always has five blocks in fixed order, the three standard
/// operators, and a forkless edge chain
/// `WAIT -> EXIT_maxtime -> job[0] -> ... -> job[n-1] -> EXIT`.
pub fn synthesize_scheme(scheme_name: &str, jobs: &[&str], floats: SchemeFloats) -> StarDocument {
    let mut doc = StarDocument::default();

    doc.blocks.push(StarBlock {
        name: "scheme_general".to_string(),
        content: BlockContent::Pairs(vec![
            (
                "_rlnSchemeName".to_string(),
                format!("Schemes/{scheme_name}/"),
            ),
            ("_rlnSchemeCurrentNodeName".to_string(), "WAIT".to_string()),
        ]),
    });

    doc.blocks.push(StarBlock {
        name: "scheme_floats".to_string(),
        content: BlockContent::Table(StarTable {
            columns: vec![
                "_rlnSchemeFloatVariableName".to_string(),
                "_rlnSchemeFloatVariableValue".to_string(),
                "_rlnSchemeFloatVariableResetValue".to_string(),
            ],
            rows: vec![
                row3("do_at_most", &float(floats.do_at_most)),
                row3("maxtime_hr", &float(floats.maxtime_hr)),
                row3("wait_sec", &float(floats.wait_sec)),
            ],
        }),
    });

    doc.blocks.push(StarBlock {
        name: "scheme_operators".to_string(),
        content: BlockContent::Table(StarTable {
            columns: vec![
                "_rlnSchemeOperatorName".to_string(),
                "_rlnSchemeOperatorType".to_string(),
                "_rlnSchemeOperatorOutput".to_string(),
                "_rlnSchemeOperatorInput1".to_string(),
                "_rlnSchemeOperatorInput2".to_string(),
            ],
            rows: vec![
                vec![
                    "EXIT".to_string(),
                    "exit".to_string(),
                    "undefined".to_string(),
                    "undefined".to_string(),
                    "undefined".to_string(),
                ],
                vec![
                    "EXIT_maxtime".to_string(),
                    "exit_maxtime".to_string(),
                    "undefined".to_string(),
                    "maxtime_hr".to_string(),
                    "undefined".to_string(),
                ],
                vec![
                    "WAIT".to_string(),
                    "wait".to_string(),
                    "undefined".to_string(),
                    "wait_sec".to_string(),
                    "undefined".to_string(),
                ],
            ],
        }),
    });

    doc.blocks.push(StarBlock {
        name: "scheme_jobs".to_string(),
        content: BlockContent::Table(StarTable {
            columns: vec![
                "_rlnSchemeJobNameOriginal".to_string(),
                "_rlnSchemeJobName".to_string(),
                "_rlnSchemeJobMode".to_string(),
                "_rlnSchemeJobHasStarted".to_string(),
            ],
            rows: jobs
                .iter()
                .map(|job| {
                    vec![
                        (*job).to_string(),
                        (*job).to_string(),
                        "continue".to_string(),
                        "0".to_string(),
                    ]
                })
                .collect(),
        }),
    });

    let mut edges = Vec::with_capacity(jobs.len() + 2);
    let mut from = "WAIT".to_string();
    for to in std::iter::once("EXIT_maxtime")
        .chain(jobs.iter().copied())
        .chain(std::iter::once("EXIT"))
    {
        edges.push(vec![
            from.clone(),
            to.to_string(),
            "0".to_string(),
            "undefined".to_string(),
            "undefined".to_string(),
        ]);
        from = to.to_string();
    }
    // The guard edge chains WAIT through EXIT_maxtime into the first job;
    // the final edge lands on EXIT.
    doc.blocks.push(StarBlock {
        name: "scheme_edges".to_string(),
        content: BlockContent::Table(StarTable {
            columns: vec![
                "_rlnSchemeEdgeInputNodeName".to_string(),
                "_rlnSchemeEdgeOutputNodeName".to_string(),
                "_rlnSchemeEdgeIsFork".to_string(),
                "_rlnSchemeEdgeOutputNodeNameIfTrue".to_string(),
                "_rlnSchemeEdgeBooleanVariable".to_string(),
            ],
            rows: edges,
        }),
    });

    doc
}

fn row3(name: &str, value: &str) -> Vec<String> {
    vec![name.to_string(), value.to_string(), value.to_string()]
}
