//! HPC requisition planner: packs a flat resource request across heterogeneous node
//! classes and emits PBS-style `-l select=...` submit arguments.
//!
//! Worked example (see tests below): a request of `{cpus: 512, memory: 256gb}` against
//! node classes `cpu_nodes` (128 cpus/node, 256gb/node, exclusive) and `gpu_nodes` (64
//! cpus/node, 512gb/node, 4 gpus:a100/node) resolves to 4 exclusive `cpu_nodes`,
//! emitted as `select=4:ncpus=128:memory=256gb`.

use std::collections::{HashMap, HashSet};

use crate::error::{OrchestratorError, Result};
use crate::resource::amount::Amount;

/// A homogeneous block of compute the HPC host can hand out: `node_count` nodes,
/// each offering `per_node` resources. `exclusive` means a submission claiming any
/// part of this class must claim a whole node's worth of every resource.
#[derive(Debug, Clone)]
pub struct NodeClass {
    pub name: String,
    pub exclusive: bool,
    pub per_node: HashMap<String, Amount>,
    pub node_count: u64,
}

impl NodeClass {
    pub fn total(&self, resource: &str) -> Option<Amount> {
        self.per_node.get(resource).and_then(|per| {
            per.total()
                .checked_mul(self.node_count)
                .map(|total| Amount::new(total, per.unit()))
        })
    }
}

/// One chunk of a requisition: `nodes` nodes of `node_class`, each contributing
/// `select_amounts` of the named resources. Amounts keep their unit so submit-arg
/// rendering can scale them back up (`256gb`, not a raw byte count).
#[derive(Debug, Clone)]
pub struct RequisitionChunk {
    pub node_class: String,
    pub nodes: u64,
    pub select_amounts: Vec<(String, Amount)>,
}

/// Resolves a generic resource name (`gpus`) to the unique specific variant a node
/// class offers (`gpus:a100`), or leaves it unchanged if it is already specific or
/// unambiguous as-is.
fn resolve_name(request_name: &str, classes: &[NodeClass]) -> Option<String> {
    if classes.iter().any(|c| c.per_node.contains_key(request_name)) {
        return Some(request_name.to_string());
    }
    let prefix = format!("{request_name}:");
    let mut matches: Vec<&str> = classes
        .iter()
        .flat_map(|c| c.per_node.keys())
        .filter(|k| k.starts_with(&prefix))
        .map(String::as_str)
        .collect();
    matches.sort_unstable();
    matches.dedup();
    match matches.len() {
        1 => Some(matches[0].to_string()),
        _ => None,
    }
}

fn ceil_div(numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return 0;
    }
    numerator.div_ceil(denominator)
}

/// Resolves a resource request against a host's node classes. A `"select"` entry
/// carrying a manual PBS-style string (`"1:ncpus=8:ngpus=1"`, chunks separated by
/// `+`) bypasses packing entirely and is parsed verbatim into chunks, per the
/// requisition planner's step 1. Otherwise every entry is parsed as an amount and
/// packed greedily across `classes`.
pub fn requisition(request: &HashMap<String, String>, classes: &[NodeClass]) -> Result<Vec<RequisitionChunk>> {
    if let Some(select) = request.get("select") {
        return parse_select(select);
    }
    let mut amounts = HashMap::new();
    for (name, raw) in request {
        amounts.insert(name.clone(), Amount::parse(raw)?);
    }
    requisition_packed(&amounts, classes)
}

/// Parses a manual `select=`-style string (the `select=`/`-l` prefix already
/// stripped) into chunks without consulting any node class: `<nodes>[:k=v]*`
/// chunks separated by `+`.
fn parse_select(select: &str) -> Result<Vec<RequisitionChunk>> {
    let mut chunks = Vec::new();
    for chunk_str in select.split('+') {
        let mut parts = chunk_str.split(':');
        let nodes: u64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| OrchestratorError::ResourceParse {
                input: select.to_string(),
            })?;
        let mut select_amounts = Vec::new();
        for kv in parts {
            let (resource, value) = kv.split_once('=').ok_or_else(|| OrchestratorError::ResourceParse {
                input: select.to_string(),
            })?;
            select_amounts.push((resource.to_string(), Amount::parse(value)?));
        }
        chunks.push(RequisitionChunk {
            node_class: String::new(),
            nodes,
            select_amounts,
        });
    }
    Ok(chunks)
}

/// Packs `request` (canonical-or-generic resource name -> amount) across `classes`,
/// greedily choosing at each step the unvisited class whose per-node resource names
/// overlap the remaining request the most.
fn requisition_packed(
    request: &HashMap<String, Amount>,
    classes: &[NodeClass],
) -> Result<Vec<RequisitionChunk>> {
    let mut remaining: HashMap<String, Amount> = HashMap::new();
    for (name, amount) in request {
        let resolved = resolve_name(name, classes).ok_or_else(|| OrchestratorError::UnknownResource(name.clone()))?;
        remaining.insert(resolved, *amount);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut chunks = Vec::new();

    while remaining.values().any(|a| a.total() > 0) {
        let Some(class) = classes
            .iter()
            .filter(|c| !visited.contains(c.name.as_str()))
            .max_by_key(|c| {
                remaining
                    .keys()
                    .filter(|r| c.per_node.contains_key(r.as_str()))
                    .count()
            })
        else {
            break;
        };
        visited.insert(class.name.as_str());

        let overlap: Vec<&String> = remaining
            .keys()
            .filter(|r| class.per_node.contains_key(r.as_str()))
            .cloned()
            .collect();
        if overlap.is_empty() {
            continue;
        }

        let nodes = if let Some(override_nodes) = remaining.get("nodes") {
            override_nodes.total().clamp(1, class.node_count)
        } else {
            overlap
                .iter()
                .map(|r| {
                    let needed = remaining[*r].total();
                    let per = class.per_node[*r].total().max(1);
                    ceil_div(needed, per)
                })
                .max()
                .unwrap_or(1)
                .clamp(1, class.node_count)
        };

        let mut select_amounts = Vec::new();
        for resource in &overlap {
            let per = class.per_node[resource.as_str()];
            let select_amount = if class.exclusive {
                per.total()
            } else {
                ceil_div(remaining[resource.as_str()].total(), nodes)
            };
            select_amounts.push((resource.to_string(), Amount::new(select_amount, per.unit())));

            let satisfied = select_amount.saturating_mul(nodes);
            let entry = remaining.get_mut(resource.as_str()).unwrap();
            *entry = Amount::new(entry.total().saturating_sub(satisfied), entry.unit());
        }
        remaining.remove("nodes");

        chunks.push(RequisitionChunk {
            node_class: class.name.clone(),
            nodes,
            select_amounts,
        });
    }

    if remaining.values().any(|a| a.total() > 0) {
        let unresolved: Vec<String> = remaining
            .iter()
            .filter(|(_, a)| a.total() > 0)
            .map(|(name, amount)| format!("{name}={amount}"))
            .collect();
        return Err(OrchestratorError::RequirementUnmet {
            action: String::new(),
            reason: format!("no hpc node class could satisfy: {}", unresolved.join(", ")),
        });
    }

    Ok(chunks)
}

/// Whether an HPC job should still be considered active given the last poll's exit
/// code and captured output: a nonzero exit from the status command, or no output
/// at all, means the job record is gone or still pending and polling should
/// continue. This mirrors the batch-system convention where a `0`-exit query with
/// real output is the only signal a job has actually finished.
pub fn job_still_running(exit_code: i32, output: &str) -> bool {
    exit_code != 0 || output.trim().is_empty()
}

/// Extracts the first run of 5+ digits from batch-submission output, the shape a
/// PBS-like `qsub` uses for job ids.
pub fn extract_job_id(output: &str) -> Option<String> {
    let bytes = output.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start >= 5 {
                return Some(output[start..i].to_string());
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Renders a requisition as a single `-l select=...` PBS submit argument.
pub fn requisition_to_submit_args(chunks: &[RequisitionChunk]) -> Vec<String> {
    if chunks.is_empty() {
        return Vec::new();
    }
    let mut select = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            select.push_str(&format!("select={}", chunk.nodes));
        } else {
            select.push_str(&format!("+{}", chunk.nodes));
        }
        for (resource, amount) in &chunk.select_amounts {
            select.push_str(&format!(":{resource}={}", amount.reduce()));
        }
    }
    vec!["-l".to_string(), select]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::amount::{Amount, Unit};

    fn cpu_nodes() -> NodeClass {
        let mut per_node = HashMap::new();
        per_node.insert("ncpus".to_string(), Amount::new(128, Unit::None));
        per_node.insert("memory".to_string(), Amount::parse("256gb").unwrap());
        NodeClass {
            name: "cpu_nodes".to_string(),
            exclusive: true,
            per_node,
            node_count: 2488,
        }
    }

    fn gpu_nodes() -> NodeClass {
        let mut per_node = HashMap::new();
        per_node.insert("ncpus".to_string(), Amount::new(64, Unit::None));
        per_node.insert("memory".to_string(), Amount::parse("512gb").unwrap());
        per_node.insert("gpus:a100".to_string(), Amount::new(4, Unit::None));
        NodeClass {
            name: "gpu_nodes".to_string(),
            exclusive: false,
            per_node,
            node_count: 82,
        }
    }

    #[test]
    fn packs_exclusive_cpu_nodes_and_renders_submit_args() {
        let classes = vec![cpu_nodes(), gpu_nodes()];
        let mut request = HashMap::new();
        request.insert("ncpus".to_string(), "512".to_string());
        request.insert("memory".to_string(), "256gb".to_string());

        let chunks = requisition(&request, &classes).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].node_class, "cpu_nodes");
        assert_eq!(chunks[0].nodes, 4);

        let args = requisition_to_submit_args(&chunks);
        assert_eq!(args[0], "-l");
        assert!(args[1].starts_with("select=4:"));
        assert!(args[1].contains("ncpus=128"));
        assert!(args[1].contains("memory=256gb"));
    }

    #[test]
    fn maps_generic_gpu_name_to_specific_variant() {
        let classes = vec![cpu_nodes(), gpu_nodes()];
        let mut request = HashMap::new();
        request.insert("gpus".to_string(), "4".to_string());
        let chunks = requisition(&request, &classes).unwrap();
        assert_eq!(chunks[0].node_class, "gpu_nodes");
        assert_eq!(chunks[0].select_amounts[0].0, "gpus:a100");
    }

    #[test]
    fn manual_select_string_bypasses_packing_and_round_trips() {
        let classes = vec![cpu_nodes(), gpu_nodes()];
        let mut request = HashMap::new();
        request.insert("select".to_string(), "1:ncpus=8:ngpus=1".to_string());

        let chunks = requisition(&request, &classes).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].node_class, "");
        assert_eq!(chunks[0].nodes, 1);

        let args = requisition_to_submit_args(&chunks);
        assert_eq!(args, vec!["-l".to_string(), "select=1:ncpus=8:ngpus=1".to_string()]);
    }

    #[test]
    fn job_still_running_on_nonzero_exit_or_empty_output() {
        assert!(job_still_running(1, "anything"));
        assert!(job_still_running(0, ""));
        assert!(job_still_running(0, "   "));
        assert!(!job_still_running(0, "completed"));
    }

    #[test]
    fn extract_job_id_finds_first_long_digit_run() {
        assert_eq!(extract_job_id("12345.pbs-server\n"), Some("12345".to_string()));
        assert_eq!(extract_job_id("job id 987654321 submitted"), Some("987654321".to_string()));
        assert_eq!(extract_job_id("no id here, only 12"), None);
    }

    #[test]
    fn unsatisfiable_request_errors() {
        let classes = vec![cpu_nodes()];
        let mut request = HashMap::new();
        request.insert("gpus".to_string(), "4".to_string());
        let err = requisition(&request, &classes).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownResource(_)));
    }
}
