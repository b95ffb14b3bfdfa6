//! Reusable command templates.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{ErrorInfo, LineageError};
use crate::ids::ObjectId;
use crate::record::{index_names, ExtraFields, IndexEntry, Record, RecordKind};

/// Standard stream a parameter is bound to instead of the argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamMapping {
    /// Value is a path redirected into standard input.
    Stdin,
    /// Standard output is redirected into the path.
    Stdout,
    /// Standard error is redirected into the path.
    Stderr,
}

/// Role of a parameter within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterKind {
    /// Plain value.
    Parameter,
    /// Path consumed by the command.
    Input,
    /// Path produced by the command.
    Output,
}

/// One positional or keyword argument of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParameter {
    /// Name unique within the plan.
    pub name: String,
    /// Prefix rendered before the value. A trailing space makes it a separate argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Position on the command line; parameters without one are not rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    /// Value used when an execution does not supply one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Stream the parameter is redirected to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_to: Option<StreamMapping>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CommandParameter {
    /// Creates a parameter with the given name and nothing else set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            position: None,
            default_value: None,
            mapped_to: None,
            description: None,
        }
    }

    /// Sets the command-line position.
    pub fn at(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    /// Sets the prefix.
    pub fn prefixed(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the default value.
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Binds the parameter to a standard stream.
    pub fn mapped(mut self, stream: StreamMapping) -> Self {
        self.mapped_to = Some(stream);
        self
    }

    fn render(&self, value: &str) -> Vec<String> {
        match self.prefix.as_deref() {
            None => vec![value.to_string()],
            Some(prefix) if prefix.ends_with(' ') => {
                vec![prefix.trim_end().to_string(), value.to_string()]
            }
            Some(prefix) => vec![format!("{prefix}{value}")],
        }
    }
}

/// Caller-side description of a command, resolved into a [`Plan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSpec {
    /// Explicit plan name; derived from the command when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Executable followed by its fixed leading arguments.
    pub command: Vec<String>,
    /// Plain parameters.
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
    /// Declared inputs.
    #[serde(default)]
    pub inputs: Vec<CommandParameter>,
    /// Declared outputs.
    #[serde(default)]
    pub outputs: Vec<CommandParameter>,
    /// Exit codes considered successful.
    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<i32>,
    /// Search keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_success_codes() -> Vec<i32> {
    vec![0]
}

impl PlanSpec {
    /// Starts a plan description for the given command line prefix.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            description: None,
            command: command.into_iter().map(Into::into).collect(),
            parameters: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            success_codes: default_success_codes(),
            keywords: Vec::new(),
        }
    }

    /// Sets the plan name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a plain parameter.
    pub fn parameter(mut self, parameter: CommandParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Adds an input.
    pub fn input(mut self, input: CommandParameter) -> Self {
        self.inputs.push(input);
        self
    }

    /// Adds an output.
    pub fn output(mut self, output: CommandParameter) -> Self {
        self.outputs.push(output);
        self
    }

    /// Checks that the command is present and parameter names are unique.
    pub fn validate(&self) -> Result<(), LineageError> {
        if self.command.first().map_or(true, |exe| exe.trim().is_empty()) {
            return Err(LineageError::InvalidInput(ErrorInfo::new(
                "empty-command",
                "plan command must name an executable",
            )));
        }
        let mut seen = BTreeSet::new();
        for (_, parameter) in all_parameters(&self.parameters, &self.inputs, &self.outputs) {
            if !seen.insert(parameter.name.as_str()) {
                return Err(LineageError::InvalidInput(
                    ErrorInfo::new("duplicate-parameter", "parameter names must be unique")
                        .with_context("parameter", &parameter.name),
                ));
            }
        }
        Ok(())
    }

    /// Hash of the structure that decides plan reuse.
    pub fn structural_key(&self) -> Result<String, LineageError> {
        structural_key(
            &self.command,
            &self.success_codes,
            &self.parameters,
            &self.inputs,
            &self.outputs,
        )
    }

    /// Name used when none is given: `<executable>-<8 hex>`.
    pub fn derived_name(&self) -> Result<String, LineageError> {
        let executable = self
            .command
            .first()
            .map(|exe| exe.rsplit(['/', '\\']).next().unwrap_or(exe.as_str()).to_string())
            .unwrap_or_default();
        Ok(format!("{}-{}", executable, &self.structural_key()?[..8]))
    }
}

/// Reusable description of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Identifier of this plan version.
    pub id: ObjectId,
    /// Name shared by all versions of the plan.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Executable followed by its fixed leading arguments.
    pub command: Vec<String>,
    /// Plain parameters.
    #[serde(default)]
    pub parameters: Vec<CommandParameter>,
    /// Declared inputs.
    #[serde(default)]
    pub inputs: Vec<CommandParameter>,
    /// Declared outputs.
    #[serde(default)]
    pub outputs: Vec<CommandParameter>,
    /// Exit codes considered successful.
    #[serde(default = "default_success_codes")]
    pub success_codes: Vec<i32>,
    /// Search keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Creation time of this version.
    pub date_created: DateTime<Utc>,
    /// Previous version this one supersedes.
    #[serde(default)]
    pub derived_from: Option<ObjectId>,
    /// Set on the tombstone version written when the plan is removed.
    #[serde(default)]
    pub invalidated_at: Option<DateTime<Utc>>,
    /// Fields unknown to this schema version.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Plan {
    /// Builds a fresh plan version from a spec.
    pub fn from_spec(
        spec: &PlanSpec,
        now: DateTime<Utc>,
        derived_from: Option<ObjectId>,
    ) -> Result<Self, LineageError> {
        let name = match &spec.name {
            Some(name) => name.clone(),
            None => spec.derived_name()?,
        };
        Ok(Self {
            id: ObjectId::generate(RecordKind::Plan),
            name,
            description: spec.description.clone(),
            command: spec.command.clone(),
            parameters: spec.parameters.clone(),
            inputs: spec.inputs.clone(),
            outputs: spec.outputs.clone(),
            success_codes: spec.success_codes.clone(),
            keywords: spec.keywords.clone(),
            date_created: now,
            derived_from,
            invalidated_at: None,
            extra: ExtraFields::new(),
        })
    }

    /// Hash of the structure that decides plan reuse.
    pub fn structural_key(&self) -> Result<String, LineageError> {
        structural_key(
            &self.command,
            &self.success_codes,
            &self.parameters,
            &self.inputs,
            &self.outputs,
        )
    }

    /// Whether this version is a removal tombstone.
    pub fn is_removed(&self) -> bool {
        self.invalidated_at.is_some()
    }

    /// Iterates over every parameter with its role.
    pub fn all_parameters(&self) -> impl Iterator<Item = (ParameterKind, &CommandParameter)> {
        all_parameters(&self.parameters, &self.inputs, &self.outputs)
    }

    /// Looks up a parameter of any role by name.
    pub fn find_parameter(&self, name: &str) -> Option<(ParameterKind, &CommandParameter)> {
        self.all_parameters().find(|(_, parameter)| parameter.name == name)
    }

    /// Renders the argument vector for the given values, falling back to defaults.
    ///
    /// Parameters are ordered by position, then name. Stream-mapped parameters are
    /// excluded; see [`Plan::stream_redirects`].
    pub fn to_argv(&self, values: &BTreeMap<String, String>) -> Result<Vec<String>, LineageError> {
        let mut positioned: Vec<(u32, &CommandParameter)> = self
            .all_parameters()
            .filter(|(_, parameter)| parameter.mapped_to.is_none())
            .filter_map(|(_, parameter)| parameter.position.map(|pos| (pos, parameter)))
            .collect();
        positioned.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
        let mut argv = self.command.clone();
        for (_, parameter) in positioned {
            let value = self.value_of(parameter, values)?;
            argv.extend(parameter.render(&value));
        }
        Ok(argv)
    }

    /// Returns the stream redirections with their resolved paths.
    pub fn stream_redirects(
        &self,
        values: &BTreeMap<String, String>,
    ) -> Result<Vec<(StreamMapping, String)>, LineageError> {
        let mut redirects = Vec::new();
        for (_, parameter) in self.all_parameters() {
            if let Some(stream) = parameter.mapped_to {
                redirects.push((stream, self.value_of(parameter, values)?));
            }
        }
        redirects.sort();
        Ok(redirects)
    }

    fn value_of(
        &self,
        parameter: &CommandParameter,
        values: &BTreeMap<String, String>,
    ) -> Result<String, LineageError> {
        values
            .get(&parameter.name)
            .or(parameter.default_value.as_ref())
            .cloned()
            .ok_or_else(|| {
                LineageError::InvalidInput(
                    ErrorInfo::new("missing-parameter-value", "parameter has no value")
                        .with_context("plan", &self.id)
                        .with_context("parameter", &parameter.name),
                )
            })
    }
}

impl Record for Plan {
    const KIND: RecordKind = RecordKind::Plan;

    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![IndexEntry::Ordered {
            index: index_names::PLANS_BY_NAME,
            key: self.name.clone(),
            id: self.id.clone(),
        }];
        if let Some(parent) = &self.derived_from {
            entries.push(IndexEntry::Relation {
                index: index_names::PLAN_DERIVATION,
                left: parent.clone(),
                right: self.id.clone(),
            });
        }
        entries
    }
}

fn all_parameters<'a>(
    parameters: &'a [CommandParameter],
    inputs: &'a [CommandParameter],
    outputs: &'a [CommandParameter],
) -> impl Iterator<Item = (ParameterKind, &'a CommandParameter)> {
    parameters
        .iter()
        .map(|p| (ParameterKind::Parameter, p))
        .chain(inputs.iter().map(|p| (ParameterKind::Input, p)))
        .chain(outputs.iter().map(|p| (ParameterKind::Output, p)))
}

#[derive(Serialize)]
struct StructuralParameter<'a> {
    kind: ParameterKind,
    name: &'a str,
    prefix: Option<&'a str>,
    position: Option<u32>,
    mapped_to: Option<StreamMapping>,
}

fn structural_key(
    command: &[String],
    success_codes: &[i32],
    parameters: &[CommandParameter],
    inputs: &[CommandParameter],
    outputs: &[CommandParameter],
) -> Result<String, LineageError> {
    let codes: BTreeSet<i32> = success_codes.iter().copied().collect();
    let mut shape: Vec<StructuralParameter<'_>> = all_parameters(parameters, inputs, outputs)
        .map(|(kind, parameter)| StructuralParameter {
            kind,
            name: &parameter.name,
            prefix: parameter.prefix.as_deref(),
            position: parameter.position,
            mapped_to: parameter.mapped_to,
        })
        .collect();
    shape.sort_by(|a, b| (a.kind, a.name).cmp(&(b.kind, b.name)));

    let mut hasher = Sha256::new();
    for part in command {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.update(b"|codes");
    for code in codes {
        hasher.update(code.to_le_bytes());
    }
    hasher.update(b"|shape");
    let encoded = serde_json::to_vec(&shape).map_err(|err| {
        LineageError::InvalidInput(ErrorInfo::new("plan-shape-encode", err.to_string()))
    })?;
    hasher.update(&encoded);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wc_spec() -> PlanSpec {
        PlanSpec::new(["wc", "-l"])
            .input(
                CommandParameter::named("input-1")
                    .with_default("data/input.csv")
                    .mapped(StreamMapping::Stdin),
            )
            .output(
                CommandParameter::named("output-1")
                    .with_default("output/count.txt")
                    .mapped(StreamMapping::Stdout),
            )
    }

    #[test]
    fn structural_key_ignores_defaults_but_not_shape() {
        let base = wc_spec();
        let mut other_default = wc_spec();
        other_default.inputs[0].default_value = Some("data/other.csv".into());
        assert_eq!(base.structural_key().unwrap(), other_default.structural_key().unwrap());

        let mut moved = wc_spec();
        moved.inputs[0].mapped_to = None;
        moved.inputs[0].position = Some(1);
        assert_ne!(base.structural_key().unwrap(), moved.structural_key().unwrap());

        let mut codes = wc_spec();
        codes.success_codes = vec![0, 1];
        assert_ne!(base.structural_key().unwrap(), codes.structural_key().unwrap());
    }

    #[test]
    fn derived_name_uses_executable_basename() {
        let spec = PlanSpec::new(["/usr/bin/python3", "train.py"]);
        let name = spec.derived_name().unwrap();
        assert!(name.starts_with("python3-"));
        assert_eq!(name.len(), "python3-".len() + 8);
    }

    #[test]
    fn argv_orders_by_position_and_renders_prefixes() {
        let spec = PlanSpec::new(["python", "train.py"])
            .parameter(CommandParameter::named("epochs").prefixed("--epochs=").at(3).with_default("10"))
            .parameter(CommandParameter::named("seed").prefixed("-s ").at(2).with_default("7"))
            .input(CommandParameter::named("data").at(1).with_default("data/train.csv"))
            .output(CommandParameter::named("model").at(4).with_default("out/model.bin"));
        let plan = Plan::from_spec(&spec, Utc::now(), None).unwrap();
        let mut values = BTreeMap::new();
        values.insert("epochs".to_string(), "20".to_string());
        let argv = plan.to_argv(&values).unwrap();
        assert_eq!(
            argv,
            vec![
                "python",
                "train.py",
                "data/train.csv",
                "-s",
                "7",
                "--epochs=20",
                "out/model.bin"
            ]
        );
    }

    #[test]
    fn stream_redirects_resolve_defaults() {
        let plan = Plan::from_spec(&wc_spec(), Utc::now(), None).unwrap();
        let redirects = plan.stream_redirects(&BTreeMap::new()).unwrap();
        assert_eq!(
            redirects,
            vec![
                (StreamMapping::Stdin, "data/input.csv".to_string()),
                (StreamMapping::Stdout, "output/count.txt".to_string()),
            ]
        );
        assert_eq!(plan.to_argv(&BTreeMap::new()).unwrap(), vec!["wc", "-l"]);
    }

    #[test]
    fn missing_values_are_reported() {
        let spec = PlanSpec::new(["echo"]).parameter(CommandParameter::named("msg").at(1));
        let plan = Plan::from_spec(&spec, Utc::now(), None).unwrap();
        let err = plan.to_argv(&BTreeMap::new()).unwrap_err();
        assert_eq!(err.code(), "missing-parameter-value");
        assert_eq!(err.info().context.get("parameter").unwrap(), "msg");
    }

    #[test]
    fn validate_rejects_duplicates_and_empty_commands() {
        let dup = PlanSpec::new(["cp"])
            .input(CommandParameter::named("x"))
            .output(CommandParameter::named("x"));
        assert_eq!(dup.validate().unwrap_err().code(), "duplicate-parameter");
        assert_eq!(
            PlanSpec::new(Vec::<String>::new()).validate().unwrap_err().code(),
            "empty-command"
        );
    }
}
