//! Analyze and debug a real host binary.

use std::path::Path;

use elfdbg::{
    Analysis, AnalysisOptions, DebugSession, DebuggerConfig, ProjectFile, StopReason,
};

fn host_true() -> Option<&'static str> {
    let path = ["/bin/true", "/usr/bin/true"]
        .into_iter()
        .find(|p| Path::new(p).exists());
    if path.is_none() {
        eprintln!("Skipping test: no /bin/true on this host");
    }
    path
}

fn launch_session() -> Option<DebugSession> {
    if !cfg!(target_arch = "x86_64") {
        eprintln!("Skipping test: register access needs an x86-64 host");
        return None;
    }
    let path = host_true()?;
    let analysis = Analysis::from_path(path, &AnalysisOptions::default()).unwrap();
    let mut session = DebugSession::new(Some(analysis), DebuggerConfig::default());
    match session.launch(&[]) {
        Ok(_) => Some(session),
        Err(err) => {
            eprintln!("Skipping test: cannot trace {path}: {err}");
            None
        }
    }
}

#[test]
fn test_analyze_host_binary() {
    let Some(path) = host_true() else {
        return;
    };
    let analysis = Analysis::from_path(path, &AnalysisOptions::default()).unwrap();

    assert!(!analysis.instructions().is_empty());
    assert!(
        analysis
            .instructions()
            .windows(2)
            .all(|w| w[0].address < w[1].address)
    );
    let first = analysis.instructions()[0].address;
    assert_eq!(analysis.instructions_from(first, 4).len(), 4.min(analysis.instructions().len()));
    assert!(!analysis.strings().is_empty());
}

#[test]
fn test_break_at_entry_across_load_bias() {
    let Some(mut session) = launch_session() else {
        return;
    };
    let entry = session.analysis().unwrap().image().header().entry;
    let runtime = session.to_runtime(entry);
    assert_eq!(session.to_static(runtime), entry);

    let addr = session.break_at(&format!("{runtime:#x}"), None).unwrap();
    assert_eq!(addr, runtime);

    // saved breakpoints carry the link-time address
    let mut project = ProjectFile::new(session.target().map(Path::to_path_buf));
    project.set_breakpoints(session.project_breakpoints());
    assert!(project.breakpoints.contains_key(&entry));

    assert_eq!(
        session.continue_and_wait().unwrap(),
        StopReason::BreakpointHit(runtime)
    );
    assert_eq!(session.debugger_mut().get_instruction_pointer().unwrap(), runtime);
    assert!(session.location().unwrap().starts_with(&format!("{runtime:#x}")));

    assert_eq!(session.continue_and_wait().unwrap(), StopReason::Exited(0));
    assert!(!session.debugger().has_session());
}
