//! In-memory property bus for tests

use std::{collections::{HashMap, VecDeque}, sync::Mutex};
use crate::sky_math::*;
use super::{props::*, PropertyBus};

enum StepsScript {
    Sequence(VecDeque<(f64, f64)>),
    Moving { ra: f64, dec: f64 },
    SlewOnGoto { ra: f64, moves_left: usize },
}

/// Encoder samples with motion after each goto
const MOVES_PER_GOTO: usize = 2;

#[derive(Default)]
struct MockState {
    values:    HashMap<String, String>,
    writes:    Vec<String>,
    steps:     HashMap<String, StepsScript>,
    cur_steps: HashMap<String, (f64, f64)>,
}

#[derive(Default)]
pub struct MockBus {
    state: Mutex<MockState>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, device: &str, prop: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        state.values.insert(format!("{}.{}", device, prop), value.to_string());
    }

    pub fn put_f64(&self, device: &str, prop: &str, value: f64) {
        self.put(device, prop, &value.to_string());
    }

    /// Adds connected mount with location and LST already known by driver
    pub fn add_mount(&self, device: &str, lat: f64, lst: f64) {
        self.put(device, &elem(CONNECTION, CONNECTION_CONNECT), SWITCH_ON);
        self.put_f64(device, &elem(GEOGRAPHIC_COORD, GEOGRAPHIC_COORD_LAT), lat);
        self.put_f64(device, &elem(TIME_LST, TIME_LST_LST), lst);
        self.put_f64(device, &elem(EQUATORIAL_EOD_COORD, EQUATORIAL_EOD_COORD_RA), lst);
        self.put_f64(device, &elem(EQUATORIAL_EOD_COORD, EQUATORIAL_EOD_COORD_DEC), 0.0);
        self.put_f64(device, &elem(HORIZONTAL_COORD, HORIZONTAL_COORD_AZ), 180.0);
        self.put_f64(device, &elem(HORIZONTAL_COORD, HORIZONTAL_COORD_ALT), 90.0 - lat);
    }

    pub fn remove(&self, device: &str, prop: &str) {
        let mut state = self.state.lock().unwrap();
        state.values.remove(&format!("{}.{}", device, prop));
    }

    /// Encoder samples returned one by one; the last one repeats forever
    pub fn script_steps(&self, device: &str, steps: &[(f64, f64)]) {
        let mut state = self.state.lock().unwrap();
        state.steps.insert(
            device.to_string(),
            StepsScript::Sequence(steps.iter().copied().collect())
        );
    }

    /// Builds encoder samples from deltas applied to RA axis
    pub fn script_step_deltas(&self, device: &str, baseline: f64, deltas: &[f64]) {
        let mut value = baseline;
        let mut steps = vec![(value, 0.0)];
        for delta in deltas {
            value += delta;
            steps.push((value, 0.0));
        }
        self.script_steps(device, &steps);
    }

    /// Encoders never settle
    pub fn keep_moving(&self, device: &str) {
        let mut state = self.state.lock().unwrap();
        state.steps.insert(device.to_string(), StepsScript::Moving { ra: 0.0, dec: 0.0 });
    }

    /// Every coordinate write in slew mode is followed by short motion
    pub fn slew_on_goto(&self, device: &str) {
        let mut state = self.state.lock().unwrap();
        state.steps.insert(device.to_string(), StepsScript::SlewOnGoto { ra: 0.0, moves_left: 0 });
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn writes_for(&self, device: &str) -> Vec<String> {
        let prefix = format!("{}.", device);
        self.writes()
            .into_iter()
            .filter_map(|w| w.strip_prefix(&prefix).map(|s| s.to_string()))
            .collect()
    }

    fn next_steps(state: &mut MockState, device: &str) -> Option<(f64, f64)> {
        let steps = match state.steps.get_mut(device)? {
            StepsScript::Sequence(seq) => {
                if seq.len() > 1 {
                    seq.pop_front()?
                } else {
                    *seq.front()?
                }
            }
            StepsScript::Moving { ra, dec } => {
                *ra += 500.0;
                *dec += 500.0;
                (*ra, *dec)
            }
            StepsScript::SlewOnGoto { ra, moves_left } => {
                if *moves_left > 0 {
                    *moves_left -= 1;
                    *ra += 1000.0;
                }
                (*ra, 0.0)
            }
        };
        state.cur_steps.insert(device.to_string(), steps);
        Some(steps)
    }

    fn value_f64(state: &MockState, device: &str, prop: &str, elem_name: &str) -> Option<f64> {
        state.values
            .get(&format!("{}.{}.{}", device, prop, elem_name))
            .and_then(|v| v.parse().ok())
    }

    fn apply_eq_coord(state: &mut MockState, device: &str, ra: f64, dec: f64) {
        state.values.insert(
            format!("{}.{}", device, elem(EQUATORIAL_EOD_COORD, EQUATORIAL_EOD_COORD_RA)),
            ra.to_string()
        );
        state.values.insert(
            format!("{}.{}", device, elem(EQUATORIAL_EOD_COORD, EQUATORIAL_EOD_COORD_DEC)),
            dec.to_string()
        );
        let lat = Self::value_f64(state, device, GEOGRAPHIC_COORD, GEOGRAPHIC_COORD_LAT);
        let lst = Self::value_f64(state, device, TIME_LST, TIME_LST_LST);
        if let Some(lat) = lat {
            if let Ok(hz) = radec_to_azalt(&EqCoord { ra, dec }, lat, lst) {
                state.values.insert(
                    format!("{}.{}", device, elem(HORIZONTAL_COORD, HORIZONTAL_COORD_AZ)),
                    hz.az.to_string()
                );
                state.values.insert(
                    format!("{}.{}", device, elem(HORIZONTAL_COORD, HORIZONTAL_COORD_ALT)),
                    hz.alt.to_string()
                );
            }
        }
    }
}

impl PropertyBus for MockBus {
    fn get(&self, device: &str, prop: &str) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        if state.steps.contains_key(device) {
            if prop == elem(CURRENTSTEPPERS, CURRENTSTEPPERS_RA) {
                return Self::next_steps(&mut state, device).map(|s| s.0.to_string());
            }
            if prop == elem(CURRENTSTEPPERS, CURRENTSTEPPERS_DEC) {
                return state.cur_steps.get(device).map(|s| s.1.to_string());
            }
        }
        state.values.get(&format!("{}.{}", device, prop)).cloned()
    }

    fn set(&self, device: &str, prop: &str, elements: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let values = elements
            .iter()
            .map(|(e, v)| format!("{}={}", e, v))
            .collect::<Vec<_>>()
            .join(";");
        state.writes.push(format!("{}.{}.{}", device, prop, values));

        if prop == EQUATORIAL_EOD_COORD {
            let get = |name: &str| elements
                .iter()
                .find(|(e, _)| *e == name)
                .and_then(|(_, v)| v.parse::<f64>().ok());
            if let (Some(ra), Some(dec)) = (get(EQUATORIAL_EOD_COORD_RA), get(EQUATORIAL_EOD_COORD_DEC)) {
                Self::apply_eq_coord(&mut state, device, ra, dec);
            }
            let slew_mode = state.values
                .get(&format!("{}.{}.{}", device, ON_COORD_SET, ON_COORD_SET_SLEW))
                .is_some_and(|v| v == SWITCH_ON);
            if let Some(StepsScript::SlewOnGoto { moves_left, .. }) = state.steps.get_mut(device) {
                if slew_mode {
                    *moves_left = MOVES_PER_GOTO + 1;
                }
            }
            return;
        }

        if prop == ON_COORD_SET {
            for mode in [ON_COORD_SET_SLEW, ON_COORD_SET_TRACK, ON_COORD_SET_SYNC] {
                state.values.remove(&format!("{}.{}.{}", device, prop, mode));
            }
        }

        for (elem_name, value) in elements {
            state.values.insert(
                format!("{}.{}.{}", device, prop, elem_name),
                value.to_string()
            );
        }
    }
}
