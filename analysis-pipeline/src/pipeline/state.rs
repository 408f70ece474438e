use state_machines::state_machine;

state_machine! {
    name: AnalysisMachine,
    state: AnalysisState,
    initial: Ready,
    states: [Ready, Located, Retrieved, Generated],
    events {
        locate { transition: { from: Ready, to: Located } }
        retrieve { transition: { from: Located, to: Retrieved } }
        generate { transition: { from: Retrieved, to: Generated } }
    }
}

pub fn ready() -> AnalysisMachine<(), Ready> {
    AnalysisMachine::new(())
}
