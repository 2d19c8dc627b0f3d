#![no_main]

use libfuzzer_sys::fuzz_target;
use retro_core::{CoreConfig, Decoder, Machine, WritePolicy};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let _ = Decoder::decode_slice(data);

    let config = CoreConfig {
        frame_budget_cycles: 4_096,
        ..CoreConfig::default()
    };
    let Ok(mut machine) = Machine::new(config) else {
        return;
    };
    let Ok(ram) = machine.add_ram("work", 0x2000) else {
        return;
    };
    let mut image = vec![0xEA; 0x2000];
    let len = data.len().min(image.len());
    image[..len].copy_from_slice(&data[..len]);
    let Ok(rom) = machine.add_rom("program", image) else {
        return;
    };
    if machine.bind_block(0, ram, WritePolicy::Direct).is_err()
        || machine.bind_block(1, rom, WritePolicy::Ignore).is_err()
    {
        return;
    }
    // Program bytes may remap pages through TAM; every bank must stay safe.
    machine.map(7, 1);
    machine.reset();
    machine.run_frame();

    // Arbitrary bytes must never panic the restore path.
    let _ = machine.restore_state(data);
});
