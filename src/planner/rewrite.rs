//! Tree rewriting
//!
//! Generic traversal over the operator arena. Rewrites replace a node by
//! writing into its slot, so the parent never needs to be touched; a rewrite
//! that asks to be revisited has the new node (and its children) visited
//! again straight away.

use crate::common::config::PlannerConfig;
use crate::common::error::PlannerResult;
use crate::internal_err;
use crate::planner::logical_plan::{OpId, Operator, PlanArena};

/// Decision taken before a node's children are visited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Children,
    /// Do not descend; the node itself is still post-visited
    SkipChildren,
}

/// Outcome of rewriting one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewritten {
    Same,
    Changed,
    /// Changed, and the replacement must be visited again
    Revisit,
}

impl Rewritten {
    pub fn is_changed(&self) -> bool {
        !matches!(self, Rewritten::Same)
    }
}

/// Depth-first rewrite of the subtree at `root`. `pre` runs before a node's
/// children, `post` after them. Children are snapshotted after `pre`, so a
/// `post` rewrite of a parent never causes newly created nodes to be
/// visited in the same pass unless it asks for a revisit.
pub fn rewrite<Pre, Post>(
    arena: &mut PlanArena,
    root: OpId,
    max_revisits: usize,
    pre: &mut Pre,
    post: &mut Post,
) -> PlannerResult<bool>
where
    Pre: FnMut(&PlanArena, OpId) -> PlannerResult<Visit>,
    Post: FnMut(&mut PlanArena, OpId) -> PlannerResult<Rewritten>,
{
    let mut revisits = 0;
    visit(arena, root, max_revisits, &mut revisits, pre, post)
}

fn visit<Pre, Post>(
    arena: &mut PlanArena,
    id: OpId,
    max_revisits: usize,
    revisits: &mut usize,
    pre: &mut Pre,
    post: &mut Post,
) -> PlannerResult<bool>
where
    Pre: FnMut(&PlanArena, OpId) -> PlannerResult<Visit>,
    Post: FnMut(&mut PlanArena, OpId) -> PlannerResult<Rewritten>,
{
    let mut changed = false;
    loop {
        if pre(arena, id)? == Visit::Children {
            let children = arena.get(id)?.inputs();
            for child in children {
                changed |= visit(arena, child, max_revisits, revisits, pre, post)?;
            }
        }
        match post(arena, id)? {
            Rewritten::Same => return Ok(changed),
            Rewritten::Changed => return Ok(true),
            Rewritten::Revisit => {
                changed = true;
                *revisits += 1;
                if *revisits > max_revisits {
                    return Err(internal_err!(
                        "operator {} revisited more than {} times",
                        id,
                        max_revisits
                    ));
                }
                tracing::trace!(node = %id, "revisiting replaced operator");
            }
        }
    }
}

/// Repeat bottom-up passes until one changes nothing. Routes are
/// boundaries: their interior is never rewritten. Returns the number of
/// passes run.
pub fn fixed_point_bottom_up<Post>(
    arena: &mut PlanArena,
    root: OpId,
    config: &PlannerConfig,
    post: &mut Post,
) -> PlannerResult<usize>
where
    Post: FnMut(&mut PlanArena, OpId) -> PlannerResult<Rewritten>,
{
    let mut skip_routes = |arena: &PlanArena, id: OpId| -> PlannerResult<Visit> {
        Ok(match arena.get(id)? {
            Operator::Route(_) => Visit::SkipChildren,
            _ => Visit::Children,
        })
    };
    for pass in 1..=config.max_rewrite_passes {
        if !rewrite(arena, root, config.max_revisits, &mut skip_routes, post)? {
            return Ok(pass);
        }
    }
    Err(internal_err!(
        "rewrite did not reach a fixed point after {} passes",
        config.max_rewrite_passes
    ))
}

/// Visit parents before children. Nodes matching `stop_at` are visited but
/// not descended into. Children are read after `f` ran on their parent, so
/// `f` may wrap or extend them.
pub fn top_down<Stop, F>(
    arena: &mut PlanArena,
    root: OpId,
    stop_at: &Stop,
    f: &mut F,
) -> PlannerResult<()>
where
    Stop: Fn(&Operator) -> bool,
    F: FnMut(&mut PlanArena, OpId) -> PlannerResult<()>,
{
    f(arena, root)?;
    let op = arena.get(root)?;
    if stop_at(op) {
        return Ok(());
    }
    for child in op.inputs() {
        top_down(arena, child, stop_at, f)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::logical_plan::{Filter, Limit, Table};

    fn chain(arena: &mut PlanArena) -> OpId {
        let table = arena.add(Operator::Table(Table {
            table_id: 0,
            name: "t".to_string(),
            alias: "t".to_string(),
        }));
        let filter = arena.add(Operator::Filter(Filter::new(table, vec![])));
        arena.add(Operator::Limit(Limit {
            source: filter,
            count: 10,
            offset: None,
            pushed: false,
        }))
    }

    #[test]
    fn test_post_order_and_skip() -> PlannerResult<()> {
        let mut arena = PlanArena::new();
        let root = chain(&mut arena);
        let mut seen = Vec::new();
        rewrite(
            &mut arena,
            root,
            8,
            &mut |arena, id| {
                Ok(if arena.get(id)?.name() == "Filter" {
                    Visit::SkipChildren
                } else {
                    Visit::Children
                })
            },
            &mut |arena, id| {
                seen.push(arena.get(id)?.name());
                Ok(Rewritten::Same)
            },
        )?;
        assert_eq!(seen, vec!["Filter", "Limit"]);
        Ok(())
    }

    #[test]
    fn test_revisit_runs_again_and_is_bounded() -> PlannerResult<()> {
        let mut arena = PlanArena::new();
        let root = chain(&mut arena);
        let mut limit_visits = 0;
        let changed = rewrite(
            &mut arena,
            root,
            8,
            &mut |_, _| Ok(Visit::Children),
            &mut |arena, id| {
                if let Operator::Limit(limit) = arena.get_mut(id)? {
                    limit_visits += 1;
                    if limit.count > 8 {
                        limit.count -= 1;
                        return Ok(Rewritten::Revisit);
                    }
                }
                Ok(Rewritten::Same)
            },
        )?;
        assert!(changed);
        assert_eq!(limit_visits, 3);

        let err = rewrite(
            &mut arena,
            root,
            2,
            &mut |_, _| Ok(Visit::Children),
            &mut |_, _| Ok(Rewritten::Revisit),
        )
        .unwrap_err();
        assert!(err.is_internal());
        Ok(())
    }

    #[test]
    fn test_fixed_point_must_converge() {
        let mut arena = PlanArena::new();
        let root = chain(&mut arena);
        let config = PlannerConfig {
            max_rewrite_passes: 3,
            ..PlannerConfig::default()
        };
        let err = fixed_point_bottom_up(&mut arena, root, &config, &mut |_, _| {
            Ok(Rewritten::Changed)
        })
        .unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_top_down_stops() -> PlannerResult<()> {
        let mut arena = PlanArena::new();
        let root = chain(&mut arena);
        let mut seen = Vec::new();
        top_down(
            &mut arena,
            root,
            &|op| matches!(op, Operator::Filter(_)),
            &mut |arena, id| {
                seen.push(arena.get(id)?.name());
                Ok(())
            },
        )?;
        assert_eq!(seen, vec!["Limit", "Filter"]);
        Ok(())
    }
}
