use state_machines::state_machine;

state_machine! {
    name: SubmissionMachine,
    state: SubmissionState,
    initial: Ready,
    states: [Ready, Resolved, Fetched, Claimed, Written],
    events {
        resolve { transition: { from: Ready, to: Resolved } }
        fetch { transition: { from: Resolved, to: Fetched } }
        claim { transition: { from: Fetched, to: Claimed } }
        write { transition: { from: Claimed, to: Written } }
    }
}

pub fn ready() -> SubmissionMachine<(), Ready> {
    SubmissionMachine::new(())
}
