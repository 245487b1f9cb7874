//! Workflow validation.
//!
//! Checks run in a fixed order: structure, acyclicity, port type
//! compatibility, required-input coverage, parameter completeness and
//! reachability. [`validate_workflow`] stops at the first failing check;
//! [`collect_validation_errors`] reports everything it can find.

use std::collections::HashSet;

use crate::definition::WorkflowDefinition;
use crate::error::{PortDirection, ValidationError};
use crate::graph::DependencyGraph;

/// Validate a workflow definition, returning the first problem found.
///
/// Pure: the definition is never mutated, and validating the same graph
/// twice yields the same result.
pub fn validate_workflow(definition: &WorkflowDefinition) -> Result<(), ValidationError> {
    match run_checks(definition, true).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Validate a workflow definition comprehensively.
///
/// Unlike [`validate_workflow`], this collects every issue so they can be
/// reported at once. Semantic checks are skipped when the structure is
/// broken, since the graph cannot be built.
#[must_use]
pub fn collect_validation_errors(definition: &WorkflowDefinition) -> Vec<ValidationError> {
    run_checks(definition, false)
}

fn run_checks(definition: &WorkflowDefinition, fail_fast: bool) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    check_structure(definition, &mut errors);
    if !errors.is_empty() {
        return finish(errors, fail_fast);
    }

    let graph = match DependencyGraph::from_definition(definition) {
        Ok(graph) => graph,
        Err(err) => return vec![err],
    };

    let checks: [fn(&WorkflowDefinition, &DependencyGraph, &mut Vec<ValidationError>); 5] = [
        check_acyclic,
        check_port_types,
        check_required_inputs,
        check_parameters,
        check_reachability,
    ];
    for check in checks {
        check(definition, &graph, &mut errors);
        if fail_fast && !errors.is_empty() {
            break;
        }
    }

    finish(errors, fail_fast)
}

fn finish(mut errors: Vec<ValidationError>, fail_fast: bool) -> Vec<ValidationError> {
    if fail_fast {
        errors.truncate(1);
    }
    errors
}

fn check_structure(definition: &WorkflowDefinition, errors: &mut Vec<ValidationError>) {
    if definition.nodes.is_empty() {
        errors.push(ValidationError::EmptyGraph);
        return;
    }

    let mut seen_ids = HashSet::new();
    for node in &definition.nodes {
        if !seen_ids.insert(node.id) {
            errors.push(ValidationError::DuplicateNodeId(node.id));
        }
    }

    let mut connected_inputs = HashSet::new();
    for conn in &definition.connections {
        let source = definition.node(conn.from_node);
        let target = definition.node(conn.to_node);

        match source {
            None => errors.push(ValidationError::UnknownNode(conn.from_node)),
            Some(node) if node.output(&conn.from_port).is_none() => {
                errors.push(ValidationError::UnknownPort {
                    node: node.id,
                    port: conn.from_port.clone(),
                    direction: PortDirection::Output,
                });
            }
            Some(_) => {}
        }
        match target {
            None => errors.push(ValidationError::UnknownNode(conn.to_node)),
            Some(node) if node.input(&conn.to_port).is_none() => {
                errors.push(ValidationError::UnknownPort {
                    node: node.id,
                    port: conn.to_port.clone(),
                    direction: PortDirection::Input,
                });
            }
            Some(_) => {}
        }

        if !connected_inputs.insert((conn.to_node, conn.to_port.as_str())) {
            errors.push(ValidationError::DuplicateInput {
                node: conn.to_node,
                port: conn.to_port.clone(),
            });
        }
    }
}

fn check_acyclic(
    _definition: &WorkflowDefinition,
    graph: &DependencyGraph,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(cycle) = graph.find_cycle() {
        errors.push(ValidationError::CyclicGraph { cycle });
    }
}

fn check_port_types(
    definition: &WorkflowDefinition,
    _graph: &DependencyGraph,
    errors: &mut Vec<ValidationError>,
) {
    for conn in &definition.connections {
        let produced = definition
            .node(conn.from_node)
            .and_then(|n| n.output(&conn.from_port));
        let accepted = definition
            .node(conn.to_node)
            .and_then(|n| n.input(&conn.to_port));
        let (Some(produced), Some(accepted)) = (produced, accepted) else {
            continue;
        };
        if !accepted.data_type.accepts(produced.data_type) {
            errors.push(ValidationError::TypeMismatch {
                from_node: conn.from_node,
                from_port: conn.from_port.clone(),
                to_node: conn.to_node,
                to_port: conn.to_port.clone(),
                expected: accepted.data_type,
                found: produced.data_type,
            });
        }
    }
}

fn check_required_inputs(
    definition: &WorkflowDefinition,
    _graph: &DependencyGraph,
    errors: &mut Vec<ValidationError>,
) {
    for node in definition.nodes.iter().filter(|n| n.enabled) {
        for port in node.inputs.iter().filter(|p| p.required) {
            let connected = definition
                .incoming(node.id)
                .any(|c| c.to_port == port.name);
            if !connected {
                errors.push(ValidationError::MissingConnection {
                    node: node.id,
                    port: port.name.clone(),
                });
            }
        }
    }
}

fn check_parameters(
    definition: &WorkflowDefinition,
    _graph: &DependencyGraph,
    errors: &mut Vec<ValidationError>,
) {
    for node in definition.nodes.iter().filter(|n| n.enabled) {
        for spec in &node.parameter_specs {
            if let Err(issue) = spec.check(node.parameters.get(&spec.name)) {
                errors.push(ValidationError::InvalidParameter {
                    node: node.id,
                    parameter: spec.name.clone(),
                    issue,
                });
            }
        }
    }
}

fn check_reachability(
    definition: &WorkflowDefinition,
    graph: &DependencyGraph,
    errors: &mut Vec<ValidationError>,
) {
    let sources = definition
        .nodes
        .iter()
        .filter(|n| n.is_source())
        .map(|n| n.id);
    let reachable = graph.reachable_from(sources);
    for node in &definition.nodes {
        if node.enabled && !node.optional && !reachable.contains(&node.id) {
            errors.push(ValidationError::UnreachableNode(node.id));
        }
    }
}
