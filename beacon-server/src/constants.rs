include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));
