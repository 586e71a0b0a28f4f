// pf-core/src/units.rs

use uom::si::f64::{
    AngularVelocity as UomAngularVelocity, Capacitance as UomCapacitance,
    ElectricCurrent as UomElectricCurrent, ElectricPotential as UomElectricPotential,
    ElectricalResistance as UomElectricalResistance, Frequency as UomFrequency,
    Inductance as UomInductance, Power as UomPower, Time as UomTime,
};

// Public canonical unit types (SI, f64)
pub type AngularVelocity = UomAngularVelocity;
pub type Capacitance = UomCapacitance;
pub type Current = UomElectricCurrent;
pub type Frequency = UomFrequency;
pub type Inductance = UomInductance;
pub type Power = UomPower;
pub type Resistance = UomElectricalResistance;
pub type Time = UomTime;
pub type Voltage = UomElectricPotential;

#[inline]
pub fn ohm(v: f64) -> Resistance {
    use uom::si::electrical_resistance::ohm;
    Resistance::new::<ohm>(v)
}

#[inline]
pub fn henry(v: f64) -> Inductance {
    use uom::si::inductance::henry;
    Inductance::new::<henry>(v)
}

#[inline]
pub fn farad(v: f64) -> Capacitance {
    use uom::si::capacitance::farad;
    Capacitance::new::<farad>(v)
}

#[inline]
pub fn volt(v: f64) -> Voltage {
    use uom::si::electric_potential::volt;
    Voltage::new::<volt>(v)
}

#[inline]
pub fn ampere(v: f64) -> Current {
    use uom::si::electric_current::ampere;
    Current::new::<ampere>(v)
}

#[inline]
pub fn watt(v: f64) -> Power {
    use uom::si::power::watt;
    Power::new::<watt>(v)
}

#[inline]
pub fn hz(v: f64) -> Frequency {
    use uom::si::frequency::hertz;
    Frequency::new::<hertz>(v)
}

#[inline]
pub fn rad_per_s(v: f64) -> AngularVelocity {
    use uom::si::angular_velocity::radian_per_second;
    AngularVelocity::new::<radian_per_second>(v)
}

#[inline]
pub fn s(v: f64) -> Time {
    use uom::si::time::second;
    Time::new::<second>(v)
}

/// Angular frequency ω = 2πf for a nominal grid frequency.
#[inline]
pub fn omega(f: Frequency) -> AngularVelocity {
    rad_per_s(2.0 * core::f64::consts::PI * f.value)
}
