use crate::analysis::sync::{ScopeRef, SyncPlan, SyncPoint};
use crate::lowered::{FrameRole, Op};
use crate::source::StmtId;

/// Body of a function that spawns: the frame is entered once, and both the
/// normal and the exceptional exit pop it exactly once. Early returns carry
/// their own epilogue.
///
/// `final_sync` is off for `_Cilk_for` bodies, whose syncs are placed per
/// iteration.
pub fn wrap_parent(mut body: Vec<Op>, plan: &SyncPlan, final_sync: bool) -> Vec<Op> {
    if final_sync && plan.has(SyncPoint::ScopeExit(ScopeRef::Function)) {
        body.push(Op::sync());
    }
    let mut landing = vec![];
    if plan.has(SyncPoint::FunctionUnwind) {
        landing.push(Op::sync());
    }
    landing.extend([Op::Epilogue(FrameRole::Parent), Op::Resume]);

    vec![
        Op::EnterFrame(FrameRole::Parent),
        Op::Unwind { body, landing },
        Op::Epilogue(FrameRole::Parent),
    ]
}

/// Body of a spawn helper. It never syncs: the parent waits for it.
pub fn wrap_helper(body: Vec<Op>) -> Vec<Op> {
    vec![
        Op::EnterFrame(FrameRole::Helper),
        Op::Unwind {
            body,
            landing: vec![Op::Epilogue(FrameRole::Helper), Op::Resume],
        },
        Op::Epilogue(FrameRole::Helper),
    ]
}

/// A try block that spawns waits for its children before any handler runs,
/// whether it is left normally or by an exception.
pub fn absorb_try(mut body: Vec<Op>, plan: &SyncPlan, id: StmtId) -> Vec<Op> {
    if !plan.has(SyncPoint::TryUnwind(id)) {
        return body;
    }
    if plan.has(SyncPoint::ScopeExit(ScopeRef::Try(id))) {
        body.push(Op::sync());
    }
    vec![Op::Unwind {
        body,
        landing: vec![Op::sync(), Op::Resume],
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::sync::{BodyKind, plan};
    use crate::lowered::Resumable;
    use crate::source::parse;

    #[test]
    fn parent_pops_on_both_exits() {
        let unit = parse("int g(); void f() { _Cilk_spawn g(); g(); }").unwrap();
        let body = &unit.functions().next().unwrap().body;
        let plan = plan(body, BodyKind::Function, false);

        let ops = wrap_parent(vec![], &plan, true);
        let [Op::EnterFrame(FrameRole::Parent), Op::Unwind { body, landing }, Op::Epilogue(FrameRole::Parent)] =
            ops.as_slice()
        else {
            panic!("unexpected shape: {ops:?}");
        };
        assert!(matches!(body.last(), Some(Op::Resumable(Resumable::Sync))));
        assert!(matches!(
            landing.as_slice(),
            [Op::Resumable(Resumable::Sync), Op::Epilogue(FrameRole::Parent), Op::Resume]
        ));
    }

    #[test]
    fn untouched_try_is_left_alone() {
        let unit = parse("int g(); void f() { try { g(); } catch (...) {} }").unwrap();
        let body = &unit.functions().next().unwrap().body;
        let plan = plan(body, BodyKind::Function, false);
        let ops = absorb_try(vec![Op::Break], &plan, body[0].id);
        assert!(matches!(ops.as_slice(), [Op::Break]));
    }
}
