use lineage_core::config::LineageConfig;
use lineage_core::errors::LineageError;
use lineage_core::model::{
    CommandParameter, CompositeSpec, CompositeStep, ParamRef, ParameterLink, ParameterMapping,
    Plan, PlanSpec,
};
use lineage_graph::Lineage;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    lineage: Lineage,
    extract: Plan,
    report: Plan,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let lineage = Lineage::init(
        dir.path(),
        LineageConfig {
            shard_buckets: 4,
            ..LineageConfig::default()
        },
    )
    .unwrap();
    let extract = lineage
        .create_plan(
            &PlanSpec::new(["python", "extract.py"])
                .named("extract")
                .input(CommandParameter::named("raw").at(1).with_default("data/raw.csv"))
                .output(CommandParameter::named("table").at(2).with_default("work/table.csv")),
        )
        .unwrap();
    let report = lineage
        .create_plan(
            &PlanSpec::new(["python", "report.py"])
                .named("report")
                .input(CommandParameter::named("table").at(1).with_default("work/table.csv"))
                .output(CommandParameter::named("html").at(2).with_default("out/report.html")),
        )
        .unwrap();
    Fixture {
        _dir: dir,
        lineage,
        extract,
        report,
    }
}

fn pipeline(fx: &Fixture, name: &str, linked: bool) -> CompositeSpec {
    CompositeSpec {
        name: name.into(),
        description: None,
        steps: vec![
            CompositeStep {
                name: "report".into(),
                plan: fx.report.id.clone(),
            },
            CompositeStep {
                name: "extract".into(),
                plan: fx.extract.id.clone(),
            },
        ],
        links: if linked {
            vec![ParameterLink {
                source: ParamRef::new("extract", "table"),
                sinks: vec![ParamRef::new("report", "table")],
            }]
        } else {
            Vec::new()
        },
        mappings: Vec::new(),
    }
}

#[test]
fn links_order_steps_and_carry_values() {
    let fx = fixture();
    let created = fx.lineage.create_composite(pipeline(&fx, "build", true)).unwrap();
    let workflow = fx.lineage.expand_composite("build").unwrap();
    assert_eq!(workflow.composite, created.id);
    assert_eq!(workflow.step_names(), vec!["extract", "report"]);
    assert!(workflow
        .edges
        .contains(&("extract".to_string(), "report".to_string())));
    let report = workflow.step("report").unwrap();
    assert_eq!(report.values["table"], "work/table.csv");
    assert_eq!(report.plan.id, fx.report.id);

    let again = fx.lineage.create_composite(pipeline(&fx, "build", true)).unwrap();
    assert_eq!(again.id, created.id);
}

#[test]
fn removing_the_link_is_an_unresolved_implicit_dependency() {
    let fx = fixture();
    let created = fx.lineage.create_composite(pipeline(&fx, "build", true)).unwrap();
    let err = fx
        .lineage
        .create_composite(pipeline(&fx, "build", false))
        .unwrap_err();
    assert!(matches!(err, LineageError::UnresolvedLink(_)));
    assert_eq!(err.code(), "implicit-dependency");
    assert_eq!(err.info().context["producer"], "extract.table");
    assert_eq!(err.info().context["consumer"], "report.table");
    assert_eq!(fx.lineage.composite("build").unwrap().id, created.id);
}

#[test]
fn references_to_missing_steps_or_parameters_are_unresolved() {
    let fx = fixture();
    let mut spec = pipeline(&fx, "broken", true);
    spec.links[0].sinks = vec![ParamRef::new("publish", "table")];
    let err = fx.lineage.create_composite(spec).unwrap_err();
    assert_eq!(err.code(), "missing-step");

    let mut spec = pipeline(&fx, "broken", true);
    spec.links[0].source = ParamRef::new("extract", "tabel");
    let err = fx.lineage.create_composite(spec).unwrap_err();
    assert!(matches!(err, LineageError::UnresolvedLink(_)));
    assert_eq!(err.code(), "missing-parameter");
    assert_eq!(err.info().context["reference"], "extract.tabel");

    assert!(matches!(
        fx.lineage.composite("broken").unwrap_err(),
        LineageError::NotFound(_)
    ));
}

#[test]
fn link_cycles_and_self_links_are_rejected() {
    let fx = fixture();
    let mut spec = pipeline(&fx, "loop", true);
    spec.links.push(ParameterLink {
        source: ParamRef::new("report", "html"),
        sinks: vec![ParamRef::new("extract", "raw")],
    });
    let err = fx.lineage.create_composite(spec).unwrap_err();
    assert!(matches!(err, LineageError::CyclicComposition(_)));
    assert_eq!(err.code(), "link-cycle");

    let mut spec = pipeline(&fx, "selfish", true);
    spec.links.push(ParameterLink {
        source: ParamRef::new("extract", "table"),
        sinks: vec![ParamRef::new("extract", "raw")],
    });
    let err = fx.lineage.create_composite(spec).unwrap_err();
    assert_eq!(err.code(), "self-link");
}

#[test]
fn nested_composites_expand_with_qualified_names() {
    let fx = fixture();
    let inner = fx
        .lineage
        .create_composite(CompositeSpec {
            name: "prepare".into(),
            description: Some("extraction stage".into()),
            steps: vec![CompositeStep {
                name: "extract".into(),
                plan: fx.extract.id.clone(),
            }],
            links: Vec::new(),
            mappings: vec![
                ParameterMapping {
                    name: "source".into(),
                    default_value: Some("data/inner.csv".into()),
                    description: None,
                    targets: vec![ParamRef::new("extract", "raw")],
                },
                ParameterMapping {
                    name: "table".into(),
                    default_value: None,
                    description: None,
                    targets: vec![ParamRef::new("extract", "table")],
                },
            ],
        })
        .unwrap();
    fx.lineage
        .create_composite(CompositeSpec {
            name: "publish".into(),
            description: None,
            steps: vec![
                CompositeStep {
                    name: "prep".into(),
                    plan: inner.id.clone(),
                },
                CompositeStep {
                    name: "report".into(),
                    plan: fx.report.id.clone(),
                },
            ],
            links: vec![ParameterLink {
                source: ParamRef::new("prep", "table"),
                sinks: vec![ParamRef::new("report", "table")],
            }],
            mappings: vec![ParameterMapping {
                name: "input".into(),
                default_value: Some("data/override.csv".into()),
                description: None,
                targets: vec![ParamRef::new("prep", "source")],
            }],
        })
        .unwrap();

    let workflow = fx.lineage.expand_composite("publish").unwrap();
    assert_eq!(workflow.step_names(), vec!["prep.extract", "report"]);
    assert_eq!(
        workflow.step("prep.extract").unwrap().values["raw"],
        "data/override.csv"
    );
    assert!(workflow
        .edges
        .contains(&("prep.extract".to_string(), "report".to_string())));

    let inner_only = fx.lineage.expand_composite("prepare").unwrap();
    assert_eq!(inner_only.step("extract").unwrap().values["raw"], "data/inner.csv");
}

#[test]
fn unknown_children_are_unresolved() {
    let fx = fixture();
    let mut spec = pipeline(&fx, "ghost", true);
    spec.steps[0].plan = lineage_core::ObjectId::generate(lineage_core::RecordKind::Plan);
    let err = fx.lineage.create_composite(spec).unwrap_err();
    assert_eq!(err.code(), "missing-child");
    assert!(matches!(
        fx.lineage.create_composite(CompositeSpec {
            name: "empty".into(),
            ..CompositeSpec::default()
        }),
        Err(LineageError::InvalidInput(_))
    ));
}

#[test]
fn dotted_step_names_are_rejected() {
    let fx = fixture();
    let mut spec = pipeline(&fx, "dotted", true);
    spec.steps[1].name = "prep.extract".into();
    spec.links[0].source = ParamRef::new("prep.extract", "table");
    let err = fx.lineage.create_composite(spec).unwrap_err();
    assert!(matches!(err, LineageError::InvalidInput(_)));
    assert_eq!(err.code(), "invalid-step-name");
    assert_eq!(err.info().context["step"], "prep.extract");
    assert!(fx.lineage.composite("dotted").is_err());
}
