//! Clear pulse and bulk discharge.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::address::CHIP_SELECT_COUNT;
    use crate::driver::StatusCode;
    use crate::gateway::DeviceOp;
    use crate::matrix::tests::helpers::*;

    #[test]
    fn clear__releases_every_relay() {
        let (fixture, mut matrix) = sim_matrix();
        matrix.set_matrix(&[2, 100, 500], &[1, 64]).unwrap();
        assert!(!fixture.relay_state().is_released());

        matrix.clear().unwrap();

        assert!(fixture.relay_state().is_released());
    }

    #[test]
    fn clear__twice_equals_once() {
        let (fixture, mut matrix) = sim_matrix();
        matrix.set_matrix(&[7, 8, 9], &[1]).unwrap();

        matrix.clear().unwrap();
        let once_relays = fixture.relay_state();
        let once_words: Vec<_> = (0..CHIP_SELECT_COUNT).map(|cs| fixture.register_word(cs)).collect();

        matrix.clear().unwrap();
        let twice_words: Vec<_> = (0..CHIP_SELECT_COUNT).map(|cs| fixture.register_word(cs)).collect();

        assert_eq!(fixture.relay_state(), once_relays);
        assert_eq!(twice_words, once_words);
    }

    #[test]
    fn clear__pulses_dio_then_zeroes_every_chip_select() {
        let (fixture, mut matrix) = sim_matrix();
        matrix.clear().unwrap();

        let calls = fixture.device_calls();
        let dio: Vec<_> = calls
            .iter()
            .filter(|op| matches!(op, DeviceOp::DioSetPortDirectionMap | DeviceOp::DioWritePort))
            .collect();
        assert_eq!(dio.len(), 5);
        assert_eq!(*dio[0], DeviceOp::DioSetPortDirectionMap);

        let writes = fixture.spi_writes();
        assert_eq!(writes.len(), 2 * CHIP_SELECT_COUNT as usize);
        assert!(writes.iter().all(|(_, bytes)| bytes.iter().all(|&b| b == 0)));
        let chip_selects: Vec<u32> = writes.iter().step_by(2).map(|(cs, _)| *cs).collect();
        assert_eq!(chip_selects, (0..CHIP_SELECT_COUNT as u32).collect::<Vec<_>>());
    }

    #[test]
    fn clear__dio_failure_stops_before_spi() {
        let (fixture, mut matrix) = sim_matrix();
        fixture.fail_device_call(DeviceOp::DioWritePort, 2, StatusCode::InvalidDioLineNumber);

        let err = matrix.clear().unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::InvalidDioLineNumber));
        assert_eq!(count(&fixture, DeviceOp::DioWritePort), 2);
        assert_eq!(count(&fixture, DeviceOp::ConfigurationOpen), 0);
    }

    #[test]
    fn discharge__chunks_whole_universe_against_ground() {
        let (fixture, mut matrix) = sim_matrix();
        matrix.discharge_all(512, &[1], 50).unwrap();

        // 512 pins in chunks of 50 -> 11 batches.
        assert_eq!(count(&fixture, DeviceOp::ConfigurationOpen), 11);

        let relays = fixture.relay_state();
        assert_eq!(relays.zap.len(), 512);
        assert_eq!(relays.ground.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn discharge__small_universe_single_chunk() {
        let (fixture, mut matrix) = sim_matrix();
        matrix.discharge_all(8, &[1], 50).unwrap();

        assert_eq!(count(&fixture, DeviceOp::ConfigurationOpen), 1);
        assert_eq!(fixture.relay_state().zap.len(), 8);
    }

    #[test]
    fn discharge__stops_at_first_failing_chunk() {
        let (fixture, mut matrix) = sim_matrix();
        fixture.fail_device_call(DeviceOp::ConfigurationOpen, 3, StatusCode::TooManyConfigurations);

        let err = matrix.discharge_all(512, &[1], 50).unwrap_err();

        assert!(err.to_string().contains("too many open configurations"));
        assert_eq!(count(&fixture, DeviceOp::ConfigurationOpen), 3);
    }
}
